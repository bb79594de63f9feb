mod migration_set;
mod migrator;

pub use migration_set::*;
pub use migrator::*;
