//! Event-loop and promise-ordering tests: microtasks drain before every
//! posted dispatch, `once` events fire at most once, and cancellation
//! suppresses queued postings.

use std::{cell::RefCell, rc::Rc};

use lutra::{Engine, EngineOptions, EventId, HostOps, Object, RunStatus};

/// Records timer registrations so the test can play the host.
#[derive(Debug, Default, Clone)]
struct TestOps {
    timers: Rc<RefCell<Vec<(u64, EventId)>>>,
    cleared: Rc<RefCell<Vec<u64>>>,
}

impl HostOps for TestOps {
    fn set_timer(&mut self, delay_ms: u64, event: EventId) -> u64 {
        self.timers.borrow_mut().push((delay_ms, event));
        u64::from(event.raw()) + 1000
    }

    fn clear_timer(&mut self, handle: u64) {
        self.cleared.borrow_mut().push(handle);
    }
}

fn engine(source: &str) -> Engine {
    let mut engine = Engine::new(EngineOptions::default());
    engine.compile(source).unwrap();
    engine
}

#[test]
fn microtask_runs_before_any_timer() {
    let engine = engine(
        "var order = [];\n\
         setTimeout(function() { order.push('timer'); }, 0);\n\
         var p = new Promise(function(res) { res(1); });\n\
         p.then(function(v) { order.push('promise:' + v); });",
    );
    let mut vm = engine.vm().unwrap();
    let ops = TestOps::default();
    let timers = ops.timers.clone();
    vm.set_host_ops(Box::new(ops));

    vm.start().unwrap();
    // The microtask already ran; the timer has not fired yet.
    assert_eq!(
        vm.value("order").unwrap(),
        Object::Array(vec![Object::String("promise:1".to_owned())])
    );
    assert!(vm.pending());
    assert!(vm.waiting(), "a registered timer with nothing posted is waiting");

    // Play the host: fire the timer.
    let (_, event) = timers.borrow()[0];
    vm.post_event(event, &[]).unwrap();
    assert!(vm.posted());
    assert_eq!(vm.run().unwrap(), RunStatus::Ok);
    assert_eq!(
        vm.value("order").unwrap(),
        Object::Array(vec![
            Object::String("promise:1".to_owned()),
            Object::String("timer".to_owned()),
        ])
    );
    assert!(!vm.pending());
}

#[test]
fn microtasks_drain_between_posted_events() {
    let engine = engine(
        "var order = [];\n\
         function a() { order.push('A'); Promise.resolve(0).then(function() { order.push('mA'); }); }\n\
         function b() { order.push('B'); }",
    );
    let mut vm = engine.vm().unwrap();
    vm.start().unwrap();

    let ev_a = vm.add_event("a", true).unwrap();
    let ev_b = vm.add_event("b", true).unwrap();
    vm.post_event(ev_a, &[]).unwrap();
    vm.post_event(ev_b, &[]).unwrap();
    assert_eq!(vm.run().unwrap(), RunStatus::Ok);

    // A's microtask runs before B's callback.
    assert_eq!(
        vm.value("order").unwrap(),
        Object::Array(vec![
            Object::String("A".to_owned()),
            Object::String("mA".to_owned()),
            Object::String("B".to_owned()),
        ])
    );
}

#[test]
fn once_event_fires_at_most_once() {
    let engine = engine("var hits = 0;\nfunction cb() { hits += 1; }");
    let mut vm = engine.vm().unwrap();
    vm.start().unwrap();

    let event = vm.add_event("cb", true).unwrap();
    // The host mis-posts twice; the once event still fires once.
    vm.post_event(event, &[]).unwrap();
    vm.post_event(event, &[]).unwrap();
    vm.run().unwrap();
    assert_eq!(vm.value("hits").unwrap(), Object::Number(1.0));
}

#[test]
fn repeating_event_stays_registered() {
    let engine = engine("var hits = 0;\nfunction cb() { hits += 1; }");
    let mut vm = engine.vm().unwrap();
    vm.start().unwrap();

    let event = vm.add_event("cb", false).unwrap();
    vm.post_event(event, &[]).unwrap();
    assert_eq!(vm.run().unwrap(), RunStatus::Again, "non-once event remains registered");
    vm.post_event(event, &[]).unwrap();
    vm.run().unwrap();
    assert_eq!(vm.value("hits").unwrap(), Object::Number(2.0));
    vm.del_event(event);
    assert!(!vm.pending());
}

#[test]
fn cancellation_suppresses_queued_posting() {
    let engine = engine("var hits = 0;\nfunction cb() { hits += 1; }");
    let mut vm = engine.vm().unwrap();
    vm.start().unwrap();

    let event = vm.add_event("cb", true).unwrap();
    vm.post_event(event, &[]).unwrap();
    vm.del_event(event);
    vm.run().unwrap();
    assert_eq!(vm.value("hits").unwrap(), Object::Number(0.0));
}

#[test]
fn clear_timeout_reaches_the_host() {
    let engine = engine("var id = setTimeout(function() {}, 50);\nclearTimeout(id);");
    let mut vm = engine.vm().unwrap();
    let ops = TestOps::default();
    let cleared = ops.cleared.clone();
    vm.set_host_ops(Box::new(ops));
    vm.start().unwrap();
    assert_eq!(cleared.borrow().len(), 1);
    assert!(!vm.pending());
}

#[test]
fn event_callback_receives_posted_args() {
    let engine = engine("var got = null;\nfunction cb(a, b) { got = a + b; }");
    let mut vm = engine.vm().unwrap();
    vm.start().unwrap();

    let event = vm.add_event("cb", true).unwrap();
    vm.post_event(event, &[Object::Number(40.0), Object::Number(2.0)]).unwrap();
    vm.run().unwrap();
    assert_eq!(vm.value("got").unwrap(), Object::Number(42.0));
}

#[test]
fn chained_then_resolves_in_order() {
    let engine = engine(
        "var order = [];\n\
         Promise.resolve(1)\n\
           .then(function(v) { order.push(v); return v + 1; })\n\
           .then(function(v) { order.push(v); });",
    );
    let mut vm = engine.vm().unwrap();
    vm.start().unwrap();
    assert_eq!(
        vm.value("order").unwrap(),
        Object::Array(vec![Object::Number(1.0), Object::Number(2.0)])
    );
}

#[test]
fn rejection_takes_the_catch_path() {
    let engine = engine(
        "var seen = null;\n\
         new Promise(function(res, rej) { rej(new Error('nope')); })\n\
           .then(function() { seen = 'then'; })\n\
           .catch(function(e) { seen = 'catch:' + e.message; });",
    );
    let mut vm = engine.vm().unwrap();
    vm.start().unwrap();
    assert_eq!(vm.value("seen").unwrap(), Object::String("catch:nope".to_owned()));
}

#[test]
fn handler_resolution_adopts_promises() {
    let engine = engine(
        "var got = null;\n\
         Promise.resolve(1)\n\
           .then(function(v) { return Promise.resolve(v + 10); })\n\
           .then(function(v) { got = v; });",
    );
    let mut vm = engine.vm().unwrap();
    vm.start().unwrap();
    assert_eq!(vm.value("got").unwrap(), Object::Number(11.0));
}
