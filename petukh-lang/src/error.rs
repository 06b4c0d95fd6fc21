use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Error {
    #[error("Line {line}, col {column}: {message}")]
    Parse {
        line: u32,
        column: u32,
        message: String,
    },
    #[error("Line {line}, col {column}: {message}")]
    Semantic {
        line: u32,
        column: u32,
        message: String,
    },
    #[error("Runtime error at line {line}, col {column}: {message}")]
    Runtime {
        line: u32,
        column: u32,
        message: String,
    },
}

impl Error {
    pub fn message(&self) -> &str {
        match self {
            Error::Parse { message, .. }
            | Error::Semantic { message, .. }
            | Error::Runtime { message, .. } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = Error::Parse {
            line: 3,
            column: 7,
            message: "expected ';' after expression at '}'".to_owned(),
        };
        assert_eq!(
            e.to_string(),
            "Line 3, col 7: expected ';' after expression at '}'"
        );
        assert_eq!(e.message(), "expected ';' after expression at '}'");
    }

    #[test]
    fn test_serialize_tagged() {
        let e = Error::Semantic {
            line: 1,
            column: 2,
            message: "Undeclared variable: y".to_owned(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "Semantic");
        assert_eq!(json["line"], 1);
        assert_eq!(json["message"], "Undeclared variable: y");
    }
}
