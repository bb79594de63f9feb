mod action;
mod attribute;
mod common;
mod kas;
mod key_management;
mod namespace;
mod obligation;
mod registered_resource;
mod resource_mapping;
mod subject_mapping;

pub use action::*;
pub use attribute::*;
pub use common::*;
pub use kas::*;
pub use key_management::*;
pub use namespace::*;
pub use obligation::*;
pub use registered_resource::*;
pub use resource_mapping::*;
pub use subject_mapping::*;

pub(crate) use common::policy_enum;
