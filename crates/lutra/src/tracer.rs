//! Execution tracing hooks.
//!
//! The VM is generic over a tracer so the default no-op compiles away
//! entirely. `CollectTracer` records events for tests and tooling.

/// Observer of VM execution events.
pub trait VmTracer {
    /// Called before each instruction is executed.
    fn on_instruction(&mut self, _pc: usize, _opcode: &'static str) {}
    /// Called when a frame is pushed, with the callee's name.
    fn on_call(&mut self, _name: &str, _depth: usize) {}
    /// Called when a frame returns.
    fn on_return(&mut self, _depth: usize) {}
    /// Called when a throw begins unwinding.
    fn on_throw(&mut self) {}
}

impl<W: VmTracer + ?Sized> VmTracer for Box<W> {
    fn on_instruction(&mut self, pc: usize, opcode: &'static str) {
        (**self).on_instruction(pc, opcode);
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        (**self).on_call(name, depth);
    }

    fn on_return(&mut self, depth: usize) {
        (**self).on_return(depth);
    }

    fn on_throw(&mut self) {
        (**self).on_throw();
    }
}

/// The default tracer: does nothing, costs nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Records call names and instruction counts.
#[derive(Debug, Default, Clone)]
pub struct CollectTracer {
    pub instructions: usize,
    pub calls: Vec<String>,
    pub throws: usize,
}

impl VmTracer for CollectTracer {
    fn on_instruction(&mut self, _pc: usize, _opcode: &'static str) {
        self.instructions += 1;
    }

    fn on_call(&mut self, name: &str, _depth: usize) {
        self.calls.push(name.to_owned());
    }

    fn on_throw(&mut self) {
        self.throws += 1;
    }
}
