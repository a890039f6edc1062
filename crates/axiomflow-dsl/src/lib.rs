pub mod graph;
pub mod parser;
pub mod schema;

pub use graph::Dag;
pub use parser::{parse_workflow_file, ParseOptions, WorkflowParser};
pub use schema::{
    Edge, Gate, InputSource, ParsedWorkflow, Persona, ResourceEstimate, RetrySpec, Step,
    Workflow, WorkflowInput,
};
