//! Script evaluation.
//!
//! A build compiles the source, runs its top level once with `ps88` in
//! scope, and captures whatever callbacks were registered. This happens on
//! the control side; the host only ever receives the finished
//! [`Generation`] and swaps it in between blocks.

use crate::api::{create_engine, Callbacks, Ps88, CAPABILITY_NAME};
use crate::config::EngineSettings;
use crate::error::ScriptDiagnostic;
use crate::save::SaveBlob;
use rhai::{Engine, Scope, AST};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Result of evaluating a script, for reporting only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Ready { audio: bool, gui: bool },
    Failed(ScriptDiagnostic),
}

impl BuildOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, BuildOutcome::Ready { .. })
    }
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildOutcome::Ready { audio, gui } => {
                let registered: Vec<&str> = [(*audio, "audio"), (*gui, "gui")]
                    .into_iter()
                    .filter_map(|(on, name)| on.then_some(name))
                    .collect();
                if registered.is_empty() {
                    write!(f, "ok, no callbacks registered")
                } else {
                    write!(f, "ok, registered {}", registered.join(" + "))
                }
            }
            BuildOutcome::Failed(diag) => write!(f, "failed: {}", diag),
        }
    }
}

/// One evaluated build, ready to be committed by the host.
pub struct Generation {
    pub id: u64,
    pub engine: Arc<Engine>,
    pub ast: Arc<AST>,
    pub callbacks: Callbacks,
    pub api: Ps88,
    pub outcome: BuildOutcome,
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generation")
            .field("id", &self.id)
            .field("callbacks", &self.callbacks)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

/// Evaluates scripts with a shared engine.
pub struct ScriptBuilder {
    engine: Arc<Engine>,
    next_id: u64,
}

impl ScriptBuilder {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            engine: Arc::new(create_engine(settings)),
            next_id: 1,
        }
    }

    /// Evaluate `code` with a fresh `ps88` seeded with `blob`.
    ///
    /// Never fails: a broken script yields a generation with no callbacks.
    pub fn build(&mut self, code: &str, blob: SaveBlob) -> Generation {
        let id = self.next_id;
        self.next_id += 1;

        let api = Ps88::new(blob);
        let (ast, outcome) = match self.evaluate(code, &api) {
            Ok(ast) => {
                let callbacks = api.callbacks();
                let outcome = BuildOutcome::Ready {
                    audio: callbacks.audio.is_some(),
                    gui: callbacks.gui.is_some(),
                };
                log::info!("[BUILD] generation {}: {}", id, outcome);
                (ast, outcome)
            }
            Err(diag) => {
                api.clear_callbacks();
                log::error!("[BUILD] generation {} failed: {}", id, diag);
                (AST::empty(), BuildOutcome::Failed(diag))
            }
        };

        Generation {
            id,
            engine: Arc::clone(&self.engine),
            ast: Arc::new(ast),
            callbacks: api.callbacks(),
            api,
            outcome,
        }
    }

    fn evaluate(&self, code: &str, api: &Ps88) -> Result<AST, ScriptDiagnostic> {
        let ast = self
            .engine
            .compile(code)
            .map_err(|e| ScriptDiagnostic::from_rhai_parse(&e))?;

        let mut scope = Scope::new();
        scope.push(CAPABILITY_NAME, api.clone());

        let run = panic::catch_unwind(AssertUnwindSafe(|| {
            self.engine.run_ast_with_scope(&mut scope, &ast)
        }));
        match run {
            Ok(Ok(())) => Ok(ast),
            Ok(Err(e)) => Err(ScriptDiagnostic::from_rhai_runtime(&e)),
            Err(payload) => Err(ScriptDiagnostic::from_panic(payload.as_ref())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ScriptBuilder {
        ScriptBuilder::new(&EngineSettings::default())
    }

    #[test]
    fn test_successful_build_captures_callbacks() {
        let generation = builder().build("ps88.audio(|ctx| {});", SaveBlob::Empty);
        assert_eq!(
            generation.outcome,
            BuildOutcome::Ready {
                audio: true,
                gui: false
            }
        );
        assert!(generation.callbacks.audio.is_some());
        assert!(generation.callbacks.gui.is_none());
    }

    #[test]
    fn test_syntax_error_yields_empty_generation() {
        let generation = builder().build("ps88.audio(|ctx| {", SaveBlob::Empty);
        assert!(matches!(generation.outcome, BuildOutcome::Failed(_)));
        assert!(generation.callbacks.is_empty());
    }

    #[test]
    fn test_throw_after_registration_clears_everything() {
        let generation = builder().build(
            "ps88.audio(|ctx| {}); ps88.gui(|ctx| {}); throw \"late\";",
            SaveBlob::Empty,
        );
        match &generation.outcome {
            BuildOutcome::Failed(diag) => assert!(diag.message.contains("late")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(generation.callbacks.is_empty());
        assert!(generation.api.callbacks().is_empty());
    }

    #[test]
    fn test_save_survives_failed_build() {
        let generation = builder().build("ps88.save(\"kept\"); throw 1;", SaveBlob::Empty);
        assert!(!generation.outcome.is_ready());
        assert_eq!(generation.api.build_save(), Some(SaveBlob::Text("kept".into())));
    }

    #[test]
    fn test_generation_ids_increase() {
        let mut builder = builder();
        let first = builder.build("", SaveBlob::Empty);
        let second = builder.build("", SaveBlob::Empty);
        assert!(second.id > first.id);
        assert_eq!(first.outcome.to_string(), "ok, no callbacks registered");
    }

    #[test]
    fn test_load_sees_seed_blob() {
        let generation = builder().build(
            "let b = ps88.load(); if b != \"seed\" { throw \"mismatch\"; }",
            SaveBlob::Text("seed".into()),
        );
        assert!(generation.outcome.is_ready());
    }
}
