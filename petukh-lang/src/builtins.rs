use crate::semantic::TypeKind;

/// Functions provided by the runtime. The analyzer pre-registers their
/// signatures; the VM dispatches on them before looking for a user label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    PrintInt,
    PrintDouble,
    PrintStr,
    InputInt,
    InputDouble,
    InputStr,
    /// Reports whether the run has used up its time budget.
    TimeUp,
}

impl Builtin {
    pub const ALL: [Builtin; 7] = [
        Builtin::PrintInt,
        Builtin::PrintDouble,
        Builtin::PrintStr,
        Builtin::InputInt,
        Builtin::InputDouble,
        Builtin::InputStr,
        Builtin::TimeUp,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::PrintInt => "printInt",
            Builtin::PrintDouble => "printDouble",
            Builtin::PrintStr => "printStr",
            Builtin::InputInt => "inputInt",
            Builtin::InputDouble => "inputDouble",
            Builtin::InputStr => "inputStr",
            Builtin::TimeUp => "timeUp",
        }
    }

    pub fn params(self) -> &'static [TypeKind] {
        match self {
            Builtin::PrintInt => &[TypeKind::Int],
            Builtin::PrintDouble => &[TypeKind::Double],
            Builtin::PrintStr => &[TypeKind::String],
            Builtin::InputInt | Builtin::InputDouble | Builtin::InputStr | Builtin::TimeUp => &[],
        }
    }

    pub fn returns(self) -> TypeKind {
        match self {
            Builtin::PrintInt | Builtin::PrintDouble | Builtin::PrintStr => TypeKind::Void,
            Builtin::InputInt | Builtin::TimeUp => TypeKind::Int,
            Builtin::InputDouble => TypeKind::Double,
            Builtin::InputStr => TypeKind::String,
        }
    }
}
