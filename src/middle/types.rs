//! The type model carried by symbols.
//!
//! Types follow the C usual-arithmetic-conversion ranks, which is why
//! `long` and `long double` are kept distinct from `i32`/`f64` even
//! though their sizes coincide on this target.

use std::fmt;
use std::sync::OnceLock;

use derive_more::Display;
use regex::Regex;

use crate::error::ErrorCode;

/// Scalar type specifiers.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeSpec {
    #[display("void")]
    Void,
    #[display("i8")]
    I8,
    #[display("i16")]
    I16,
    #[display("i32")]
    I32,
    /// C `long`, distinct rank from `i32`.
    #[display("i32_")]
    I32L,
    #[display("i64")]
    I64,
    #[display("u8")]
    U8,
    #[display("u16")]
    U16,
    #[display("u32")]
    U32,
    /// C `unsigned long`.
    #[display("u32_")]
    U32L,
    #[display("u64")]
    U64,
    #[display("f32")]
    F32,
    #[display("f64")]
    F64,
    /// C `long double`.
    #[display("f64_")]
    F64L,
}

impl TypeSpec {
    const ALL: [TypeSpec; 14] = [
        TypeSpec::Void,
        TypeSpec::I8,
        TypeSpec::I16,
        TypeSpec::I32,
        TypeSpec::I32L,
        TypeSpec::I64,
        TypeSpec::U8,
        TypeSpec::U16,
        TypeSpec::U32,
        TypeSpec::U32L,
        TypeSpec::U64,
        TypeSpec::F32,
        TypeSpec::F64,
        TypeSpec::F64L,
    ];

    fn from_str(s: &str) -> Option<TypeSpec> {
        TypeSpec::ALL.iter().copied().find(|ts| ts.to_string() == s)
    }

    /// Storage size of the scalar, in bytes.
    pub fn bytes(self) -> u32 {
        match self {
            TypeSpec::Void => 0,
            TypeSpec::I8 | TypeSpec::U8 => 1,
            TypeSpec::I16 | TypeSpec::U16 => 2,
            TypeSpec::I32 | TypeSpec::I32L | TypeSpec::U32 | TypeSpec::U32L | TypeSpec::F32 => 4,
            TypeSpec::I64 | TypeSpec::U64 | TypeSpec::F64 | TypeSpec::F64L => 8,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            TypeSpec::I8 | TypeSpec::I16 | TypeSpec::I32 | TypeSpec::I32L | TypeSpec::I64
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            TypeSpec::U8 | TypeSpec::U16 | TypeSpec::U32 | TypeSpec::U32L | TypeSpec::U64
        )
    }
}

/// Category of a type: an object type or a function carrying its return
/// type.  Function types never receive storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeCat {
    Standard(TypeSpec),
    Function(Box<Type>),
}

/// A type: category plus pointer indirections and at most one array
/// dimension.
#[derive(Clone, Debug, Eq)]
pub struct Type {
    cat: TypeCat,
    pointers: u32,
    /// Element count of the single supported array dimension.
    dim: Option<u32>,
}

/// Two types are equal iff their category, specifier, and pointer count
/// match.
impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.cat == other.cat && self.pointers == other.pointers
    }
}

impl Type {
    pub fn scalar(spec: TypeSpec) -> Type {
        Type {
            cat: TypeCat::Standard(spec),
            pointers: 0,
            dim: None,
        }
    }

    pub fn pointer(spec: TypeSpec, pointers: u32) -> Type {
        Type {
            cat: TypeCat::Standard(spec),
            pointers,
            dim: None,
        }
    }

    pub fn function(ret: Type) -> Type {
        Type {
            cat: TypeCat::Function(Box::new(ret)),
            pointers: 0,
            dim: None,
        }
    }

    /// The type labels carry.
    pub fn label() -> Type {
        Type::scalar(TypeSpec::Void)
    }

    pub fn spec(&self) -> Option<TypeSpec> {
        match self.cat {
            TypeCat::Standard(ts) => Some(ts),
            TypeCat::Function(_) => None,
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self.cat, TypeCat::Function(_))
    }

    pub fn is_array(&self) -> bool {
        self.dim.is_some()
    }

    pub fn pointers(&self) -> u32 {
        self.pointers
    }

    /// Storage size in bytes; 8 for any pointer, array element counts
    /// multiply in.
    pub fn bytes(&self) -> u32 {
        let scalar = if self.pointers > 0 {
            8
        } else {
            match self.cat {
                TypeCat::Standard(ts) => ts.bytes(),
                TypeCat::Function(_) => 0,
            }
        };
        match self.dim {
            Some(n) => scalar * n,
            None => scalar,
        }
    }

    /// The type obtained by dereferencing: strips the array dimension
    /// first, then one pointer level.
    pub fn point_to(&self) -> Type {
        let mut t = self.clone();
        if t.dim.take().is_none() {
            debug_assert!(t.pointers > 0, "no pointers to strip");
            t.pointers = t.pointers.saturating_sub(1);
        }
        t
    }

    /// Parses declaration text of the form `<typename>[*...][\[N\]]`.
    pub fn parse(s: &str) -> Result<Type, ErrorCode> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"\A([A-Za-z_][A-Za-z0-9_]*)(\**)(?:\[([0-9]+)\])?\z").unwrap()
        });
        let caps = re.captures(s).ok_or(ErrorCode::InvalidInsOp)?;
        let spec = TypeSpec::from_str(&caps[1]).ok_or(ErrorCode::InvalidInsOp)?;
        let pointers = caps[2].len() as u32;
        let dim = match caps.get(3) {
            Some(m) => Some(m.as_str().parse().map_err(|_| ErrorCode::InvalidInsOp)?),
            None => None,
        };
        Ok(Type {
            cat: TypeCat::Standard(spec),
            pointers,
            dim,
        })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cat {
            TypeCat::Standard(ts) => write!(f, "{ts}")?,
            TypeCat::Function(ret) => write!(f, "fn {ret}")?,
        }
        for _ in 0..self.pointers {
            write!(f, "*")?;
        }
        if let Some(n) = self.dim {
            write!(f, "[{n}]")?;
        }
        Ok(())
    }
}
