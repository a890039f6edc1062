/// Two dependent steps with runtime/cost estimates (3.0 / 30.0 in total).
pub const TWO_STEP_WORKFLOW: &str = r#"
workflow:
  name: estimate-workflow
  version: "1.0.0"
  inputs: []
  personas:
    - id: dev
      name: Developer
      role: coder
      capabilities: [code]
  steps:
    - id: step1
      name: Step One
      persona: dev
      action: run
      inputs: {}
      outputs:
        result: string
      estimated_runtime: 1.0
      estimated_cost: 10.0
    - id: step2
      name: Step Two
      persona: dev
      action: run
      inputs:
        prev_result: step1.result
      outputs:
        final: string
      estimated_runtime: 2.0
      estimated_cost: 20.0
  edges:
    - from: step1
      to: step2
  gates: []
"#;

/// The consumer is declared before its producer; only the edge orders them.
pub const OUT_OF_ORDER_WORKFLOW: &str = r#"
workflow:
  name: out-of-order
  version: "1.0.0"
  personas:
    - id: dev
  steps:
    - id: step2
      persona: dev
      action: publish
      inputs:
        artifact: step1.artifact
    - id: step1
      persona: dev
      action: build
      outputs:
        artifact: file
  edges:
    - from: step1
      to: step2
  gates: []
"#;

pub const SELF_LOOP_WORKFLOW: &str = r#"
workflow:
  name: self-loop
  version: "1"
  personas:
    - id: dev
  steps:
    - id: a
      persona: dev
  edges:
    - from: a
      to: a
  gates: []
"#;

pub const CYCLIC_WORKFLOW: &str = r#"
workflow:
  name: cyclic
  version: "1"
  personas:
    - id: dev
  steps:
    - id: a
      persona: dev
    - id: b
      persona: dev
    - id: c
      persona: dev
  edges:
    - from: a
      to: b
    - from: b
      to: c
    - from: c
      to: a
  gates: []
"#;

/// Diamond-shaped workflow with a retrying step and a gate.
pub const DIAMOND_WORKFLOW: &str = r#"
workflow:
  name: diamond
  version: "2.1"
  inputs:
    - name: repo
      type: string
      required: true
  personas:
    - id: dev
    - id: qa
  steps:
    - id: fetch
      persona: dev
      action: checkout
      inputs:
        source: repo
      outputs:
        tree: dir
    - id: build
      persona: dev
      action: compile
      inputs:
        tree: fetch.tree
      outputs:
        binary: file
      retry:
        max_attempts: 3
        backoff_strategy: linear
        base_delay_ms: 10
    - id: lint
      persona: qa
      action: lint
      inputs:
        tree: fetch.tree
      outputs:
        report: file
    - id: release
      persona: dev
      action: publish
      gates: [signoff]
      inputs:
        binary: build.binary
        report: lint.report
  edges:
    - from: fetch
      to: build
    - from: fetch
      to: lint
    - from: build
      to: release
    - from: lint
      to: release
  gates:
    - id: signoff
      type: manual
      conditions:
        approvers: 1
"#;

/// Single-step workflow written as JSON.
pub const JSON_WORKFLOW: &str = r#"{
  "workflow": {
    "name": "json-flow",
    "version": "1.0",
    "personas": [{"id": "dev", "capabilities": ["code"]}],
    "steps": [{"id": "only", "persona": "dev", "action": "run"}],
    "edges": [],
    "gates": []
  }
}"#;

/// One step `s1` using `persona`, with `extra` spliced into the step body.
/// `extra` lines must be indented six spaces.
///
/// Declares persona `dev`, gate `review`, and workflow input `repo`.
pub fn single_step(persona: &str, extra: &str) -> String {
    format!(
        r#"
workflow:
  name: single
  version: "1"
  inputs:
    - name: repo
      type: string
  personas:
    - id: dev
  steps:
    - id: s1
      persona: {persona}
      action: run
{extra}  edges: []
  gates:
    - id: review
      type: manual
"#
    )
}
