// crates/reelplay-core/src/context.rs
//
// The shared context every system is created from: log sink and whatever
// else a host embeds. Multiple contexts can coexist in one process — there
// are no globals.

use std::sync::Arc;

use crate::log::LogSystem;

pub struct Context {
    log: Arc<LogSystem>,
}

impl Context {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { log: Arc::new(LogSystem::new()) })
    }

    pub fn log(&self) -> &Arc<LogSystem> {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contexts_are_independent() {
        let a = Context::new();
        let b = Context::new();
        let sub_b = b.log().observe();
        sub_b.drain();
        a.log().status("test", "only in a");
        assert!(sub_b.latest().is_none());
    }
}
