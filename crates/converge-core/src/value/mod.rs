pub mod syntax;

use std::fmt;

use serde::{Deserialize, Serialize};

/// List element that stands for "no value"; iteration skips it.
pub const NULL_VALUE: &str = "cf_null";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FnCall {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Rval>,
}

impl FnCall {
    pub fn new(name: impl Into<String>, args: Vec<Rval>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

impl fmt::Display for FnCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        write!(f, "{}({})", self.name, args.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rval {
    Scalar(String),
    List(Vec<Rval>),
    FnCall(FnCall),
}

impl Rval {
    pub fn scalar(text: impl Into<String>) -> Self {
        Rval::Scalar(text.into())
    }

    /// Builds a list, flattening nested lists one level.
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Rval>,
    {
        let mut flat = Vec::new();
        for item in items {
            match item {
                Rval::List(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Rval::List(flat)
    }

    pub fn call(name: impl Into<String>, args: Vec<Rval>) -> Self {
        Rval::FnCall(FnCall::new(name, args))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Rval::Scalar(_) => "scalar",
            Rval::List(_) => "list",
            Rval::FnCall(_) => "function call",
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Rval::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Rval]> {
        match self {
            Rval::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Rval::List(_))
    }

    /// True while the value still holds an unexpanded reference or an
    /// unevaluated function call.
    pub fn is_unresolved(&self) -> bool {
        match self {
            Rval::Scalar(s) => syntax::is_expandable(s),
            Rval::List(items) => items.iter().any(Rval::is_unresolved),
            Rval::FnCall(_) => true,
        }
    }

    /// Normalizes deserialized input so lists never nest.
    pub fn flattened(self) -> Self {
        match self {
            Rval::List(items) => Rval::list(items.into_iter().map(Rval::flattened)),
            Rval::FnCall(call) => Rval::FnCall(FnCall {
                name: call.name,
                args: call.args.into_iter().map(Rval::flattened).collect(),
            }),
            scalar => scalar,
        }
    }
}

impl fmt::Display for Rval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rval::Scalar(s) => write!(f, "{s}"),
            Rval::List(items) => {
                let items: Vec<String> = items.iter().map(|i| format!("'{i}'")).collect();
                write!(f, "{{{}}}", items.join(","))
            }
            Rval::FnCall(call) => write!(f, "{call}"),
        }
    }
}

impl From<&str> for Rval {
    fn from(value: &str) -> Self {
        Rval::Scalar(value.to_string())
    }
}

impl From<String> for Rval {
    fn from(value: String) -> Self {
        Rval::Scalar(value)
    }
}

impl From<Vec<&str>> for Rval {
    fn from(values: Vec<&str>) -> Self {
        Rval::List(values.into_iter().map(Rval::from).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[serde(alias = "str")]
    String,
    Int,
    Real,
    Slist,
    Ilist,
    Rlist,
    Class,
    #[default]
    #[serde(alias = "notype")]
    None,
}

impl DataType {
    /// Maps a variable-promise value lval (`string`, `slist`, ...) to its type.
    pub fn from_lval(lval: &str) -> Option<Self> {
        match lval {
            "string" => Some(DataType::String),
            "int" => Some(DataType::Int),
            "real" => Some(DataType::Real),
            "slist" => Some(DataType::Slist),
            "ilist" => Some(DataType::Ilist),
            "rlist" => Some(DataType::Rlist),
            _ => None,
        }
    }

    pub fn is_list(self) -> bool {
        matches!(self, DataType::Slist | DataType::Ilist | DataType::Rlist)
    }

    pub fn of(value: &Rval) -> Self {
        match value {
            Rval::List(_) => DataType::Slist,
            _ => DataType::String,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::String => "string",
            DataType::Int => "int",
            DataType::Real => "real",
            DataType::Slist => "slist",
            DataType::Ilist => "ilist",
            DataType::Rlist => "rlist",
            DataType::Class => "class",
            DataType::None => "none",
        };
        write!(f, "{name}")
    }
}
