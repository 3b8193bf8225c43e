mod attribute_value;
mod bucket;
mod cache;
mod config;
mod context;
mod dependency;
mod eval;
mod flag;
mod overrides;
mod rule;
mod store;
mod test_common;
mod validation;
mod variation;

pub use attribute_value::*;
pub use bucket::*;
pub use cache::*;
pub use config::*;
pub use context::*;
pub use dependency::*;
pub use eval::*;
pub use flag::*;
pub use overrides::*;
pub use rule::*;
pub use store::*;
pub use validation::*;
pub use variation::*;
