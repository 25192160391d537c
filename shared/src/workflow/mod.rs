//! Workflow definitions and the pure transforms applied to them before they are
//! compared with, or sent to, the automation engine.

pub mod definition;
pub mod diff;
pub mod inject;
pub mod normalize;

pub use definition::{
    ConnectionTarget, Connections, CredentialHandle, DefinitionError, Node, WorkflowDefinition,
    HTTP_HEADER_AUTH, HTTP_REQUEST_NODE,
};
pub use diff::{are_different, explain, Difference};
pub use inject::{Injector, InjectorError};
pub use normalize::{normalize, CanonicalForm};
