//! Rhai API for ps88 scripts.
//!
//! Scripts see a single global, `ps88`, plus the context types passed to
//! their callbacks. Everything else is the standard Rhai library.
//!
//! `ps88` lives in the top-level scope. Closures capture it, but named
//! `fn` definitions cannot see outer variables in Rhai, so a named function
//! that needs it takes it as a parameter:
//!
//! ```text
//! fn process(ctx, ps88) { ps88.save("state"); }
//! ps88.audio(|ctx| process(ctx, ps88));
//! ```
//!
//! Registering a named function directly with `ps88.audio(Fn("process"))`
//! works as long as it does not touch `ps88`.

pub mod audio;
pub mod capability;
pub mod gui;

pub use audio::{AudioContext, AudioContextBuilder, SampleBuffer, Transport};
pub use capability::{Callbacks, Ps88};
pub use gui::{DrawContext, DrawRequest, Pointer, PointerEvent};

use crate::config::EngineSettings;
use rhai::Engine;

/// Name of the capability object in script scope.
pub const CAPABILITY_NAME: &str = "ps88";

/// Create a Rhai engine with the ps88 API registered.
pub fn create_engine(settings: &EngineSettings) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_expr_depths(settings.max_expr_depth, settings.max_expr_depth);
    engine.set_max_call_levels(settings.max_call_levels);
    if settings.max_operations > 0 {
        engine.set_max_operations(settings.max_operations);
    }

    // Route print() through the log system instead of stdout
    engine.on_print(|text| {
        log::info!("[script] {}", text);
    });

    engine.on_debug(|text, source, pos| {
        let loc = match (source, pos) {
            (Some(src), pos) if !pos.is_none() => format!(" ({}:{})", src, pos),
            (Some(src), _) => format!(" ({})", src),
            (None, pos) if !pos.is_none() => format!(" ({})", pos),
            _ => String::new(),
        };
        log::debug!("[script]{} {}", loc, text);
    });

    register_api(&mut engine);

    engine
}

/// Register all ps88 types and functions with an engine.
pub fn register_api(engine: &mut Engine) {
    capability::register(engine);
    audio::register(engine);
    gui::register(engine);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_budget_stops_runaway_script() {
        let settings = EngineSettings {
            max_operations: 1_000,
            ..EngineSettings::default()
        };
        let engine = create_engine(&settings);
        assert!(engine.run("loop {}").is_err());
    }

    #[test]
    fn test_print_does_not_fail() {
        let engine = create_engine(&EngineSettings::default());
        engine.run("print(\"hello\"); debug(1);").unwrap();
    }
}
