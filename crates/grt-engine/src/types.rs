//! Runtime type tags and type specifications
//!
//! A [`TypeSpec`] describes what a member, list, dict or function argument
//! may hold: a base type, an optional object class and, for containers, a
//! content type.

use std::fmt;

use crate::error::{GrtError, GrtResult};

/// The closed set of runtime value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Type {
    /// No type information; accepts anything
    #[default]
    Unknown,
    /// 64-bit signed integer
    Integer,
    /// Double precision float
    Double,
    /// UTF-8 string
    String,
    /// Ordered list
    List,
    /// String keyed dictionary
    Dict,
    /// Instance of a metaclass
    Object,
}

impl Type {
    /// Name used in structure descriptions and documents
    pub fn name(self) -> &'static str {
        match self {
            Type::Unknown => "unknown",
            Type::Integer => "int",
            Type::Double => "real",
            Type::String => "string",
            Type::List => "list",
            Type::Dict => "dict",
            Type::Object => "object",
        }
    }

    /// Parse a type name; unrecognized names map to [`Type::Unknown`]
    pub fn from_name(name: &str) -> Type {
        match name {
            "int" => Type::Integer,
            "real" | "double" => Type::Double,
            "string" => Type::String,
            "list" => Type::List,
            "dict" => Type::Dict,
            "object" => Type::Object,
            _ => Type::Unknown,
        }
    }

    /// Numeric code used in struct checksums
    pub fn code(self) -> i32 {
        self as i32
    }

    /// True for list and dict
    pub fn is_container(self) -> bool {
        matches!(self, Type::List | Type::Dict)
    }

    /// True for int, real and string
    pub fn is_simple(self) -> bool {
        matches!(self, Type::Integer | Type::Double | Type::String)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A base type plus, for objects, the required class
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SimpleTypeSpec {
    /// Base type
    pub kind: Type,
    /// Class name when `kind` is [`Type::Object`]
    pub object_class: String,
}

impl SimpleTypeSpec {
    /// Spec for a plain type
    pub fn new(kind: Type) -> Self {
        Self {
            kind,
            object_class: String::new(),
        }
    }

    /// Spec for objects of a class
    pub fn object(class: impl Into<String>) -> Self {
        Self {
            kind: Type::Object,
            object_class: class.into(),
        }
    }
}

impl fmt::Display for SimpleTypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == Type::Object && !self.object_class.is_empty() {
            write!(f, "object<{}>", self.object_class)
        } else {
            f.write_str(self.kind.name())
        }
    }
}

/// Full type of a member or argument
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeSpec {
    /// Outer type
    pub base: SimpleTypeSpec,
    /// Element type for lists and dicts
    pub content: SimpleTypeSpec,
}

impl TypeSpec {
    /// Spec for a simple type
    pub fn simple(kind: Type) -> Self {
        Self {
            base: SimpleTypeSpec::new(kind),
            content: SimpleTypeSpec::default(),
        }
    }

    /// Spec for an object of a class
    pub fn object(class: impl Into<String>) -> Self {
        Self {
            base: SimpleTypeSpec::object(class),
            content: SimpleTypeSpec::default(),
        }
    }

    /// Spec for a list with the given content
    pub fn list(content: SimpleTypeSpec) -> Self {
        Self {
            base: SimpleTypeSpec::new(Type::List),
            content,
        }
    }

    /// Spec for a dict with the given content
    pub fn dict(content: SimpleTypeSpec) -> Self {
        Self {
            base: SimpleTypeSpec::new(Type::Dict),
            content,
        }
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.base.kind.is_container() && self.content.kind != Type::Unknown {
            write!(f, "{}<{}>", self.base.kind.name(), self.content)
        } else {
            self.base.fmt(f)
        }
    }
}

/// A named, typed argument
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArgSpec {
    /// Argument name (may be empty)
    pub name: String,
    /// Argument type
    pub type_spec: TypeSpec,
}

/// Signature of a module function
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionSpec {
    /// Function name
    pub name: String,
    /// Return type
    pub ret: TypeSpec,
    /// Arguments in order
    pub args: Vec<ArgSpec>,
}

// ============================================================================
// Signature parsing
// ============================================================================

/// Parse a signature of the form `name:ret:params`
///
/// Types are written as `i`, `r`, `s`, `l<content>`, `d<content>`,
/// `o@struct` or `o<struct>`; params are `type [name]` separated by commas.
pub fn parse_function_spec(spec: &str) -> GrtResult<FunctionSpec> {
    let mut parts = spec.splitn(3, ':');
    let name = parts.next().unwrap_or_default().trim();
    if name.is_empty() {
        return Err(GrtError::Module(format!("missing function name in '{}'", spec)));
    }
    let ret = match parts.next() {
        Some(ret) if !ret.trim().is_empty() => parse_type_token(ret.trim())?,
        _ => TypeSpec::default(),
    };
    let mut args = Vec::new();
    if let Some(params) = parts.next() {
        for param in split_params(params) {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            let (type_token, arg_name) = match param.split_once(char::is_whitespace) {
                Some((t, n)) => (t, n.trim()),
                None => (param, ""),
            };
            args.push(ArgSpec {
                name: arg_name.to_string(),
                type_spec: parse_type_token(type_token)?,
            });
        }
    }
    Ok(FunctionSpec {
        name: name.to_string(),
        ret,
        args,
    })
}

/// Split on commas that are not inside `<...>`
fn split_params(params: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(&params[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&params[start..]);
    out
}

fn parse_simple_token(token: &str) -> GrtResult<SimpleTypeSpec> {
    let mut chars = token.chars();
    match chars.next() {
        Some('i') if token.len() == 1 => Ok(SimpleTypeSpec::new(Type::Integer)),
        Some('r') if token.len() == 1 => Ok(SimpleTypeSpec::new(Type::Double)),
        Some('s') if token.len() == 1 => Ok(SimpleTypeSpec::new(Type::String)),
        Some('o') => {
            let rest = chars.as_str();
            let class = rest
                .strip_prefix('@')
                .or_else(|| rest.strip_prefix('<').and_then(|r| r.strip_suffix('>')))
                .unwrap_or(rest);
            Ok(SimpleTypeSpec::object(class))
        }
        _ => Err(GrtError::Module(format!("invalid type '{}' in signature", token))),
    }
}

fn parse_type_token(token: &str) -> GrtResult<TypeSpec> {
    let (head, content) = match token.find('<') {
        Some(pos) if token.ends_with('>') => (&token[..pos], Some(&token[pos + 1..token.len() - 1])),
        _ => (token, None),
    };
    match head {
        "l" | "d" => {
            let content = match content {
                Some(c) => parse_simple_token(c)?,
                None => SimpleTypeSpec::default(),
            };
            Ok(if head == "l" {
                TypeSpec::list(content)
            } else {
                TypeSpec::dict(content)
            })
        }
        _ => Ok(TypeSpec {
            base: parse_simple_token(token)?,
            content: SimpleTypeSpec::default(),
        }),
    }
}
