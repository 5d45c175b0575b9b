//! The lowering stage of the compiler: turns the analyzer's typed syntax
//! tree into register-based IR. It decides the runtime representation of
//! every type, synthesizes the classes backing closures and generators, and
//! specializes calls to intrinsic callables.

pub mod ast;
pub mod builder;
pub mod context;
pub mod error;
pub mod mapper;
pub mod specialize;
pub mod types;

pub use builder::Backend;
pub use context::{
    CallableClass, EnvClass, FuncCtx, FuncFlags, GeneratorClass, Link, ResumeState, EXHAUSTED,
};
pub use error::{FaultError, LowerResult};
pub use mapper::Mapper;
pub use specialize::{SpecializeCtx, Specializer, SpecializerRegistry};
pub use types::{wellknown, ClassInfo, FuncItem, FuncParam, StaticType};

type IndexMap<K, V, S = hashbrown::DefaultHashBuilder> = indexmap::IndexMap<K, V, S>;
