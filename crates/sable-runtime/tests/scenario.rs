//! End-to-end single-thread program shape: attach, allocate, construct,
//! publish, drop, detach — driven the way generated code drives the runtime.
//!
//! Uses the build-selected (strict) memory model through the `ops` facade,
//! with the runtime lifecycle owning the thread's memory state.

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use sable_memory::{ObjRef, TypeRecord, ops};
use sable_runtime::env::RuntimeEnv;
use sable_runtime::hooks::{HostHooks, WorkerId, WorkerToken};
use sable_runtime::lifecycle::{attach_if_needed_in, detach_if_needed};

/// Minimal collaborators: panicking terminate, everything else inert.
struct PanicHooks;

impl HostHooks for PanicHooks {
    fn worker_start(&self, main: bool) -> WorkerToken {
        WorkerToken::new(WorkerId(0), main)
    }
    fn worker_deinit(&self, _token: WorkerToken) {}
    fn release_worker_thread_data(&self, _id: WorkerId) {}
    fn wait_native_workers_termination(&self) {}
    fn shutdown_cleaners(&self, _run_pending: bool) {}
    fn force_full_collection(&self) {}
    fn diagnostic(&self, message: fmt::Arguments<'_>) {
        eprintln!("{message}");
    }
    fn terminate(&self) -> ! {
        panic!("runtime terminated")
    }
}

static HOOKS: PanicHooks = PanicHooks;

static WIDGET: TypeRecord = TypeRecord::object("app.Widget", 40);
static WIDGET_CTOR_RUNS: AtomicU32 = AtomicU32::new(0);

fn widget_ctor(_obj: ObjRef) {
    WIDGET_CTOR_RUNS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn attach_allocate_publish_release_detach() {
    let env: &'static RuntimeEnv = Box::leak(Box::new(RuntimeEnv::new()));
    thread::spawn(move || {
        attach_if_needed_in(env, &HOOKS);
        let memory = sable_memory::current_memory();
        assert!(!memory.is_null());

        let mut slot: ObjRef = ptr::null_mut();
        // SAFETY: slot and object lifetimes are confined to this block.
        unsafe {
            let obj = ops::init_instance(&mut slot, &WIDGET, widget_ctor);
            assert_eq!(WIDGET_CTOR_RUNS.load(Ordering::SeqCst), 1);
            assert_eq!(slot, obj);
            assert_eq!((*obj).ref_count(), 1);
            assert_eq!((*memory).live_objects(), 1);

            // Re-running initialization returns the existing singleton.
            let again = ops::init_instance(&mut slot, &WIDGET, widget_ctor);
            assert_eq!(again, obj);
            assert_eq!(WIDGET_CTOR_RUNS.load(Ordering::SeqCst), 1);

            // Dropping the last reference reclaims immediately under the
            // strict model.
            ops::update_heap_ref(&mut slot, ptr::null_mut());
            assert_eq!((*memory).live_objects(), 0);
        }
        assert!(slot.is_null());
        detach_if_needed();
    })
    .join()
    .expect("scenario thread panicked");
    assert_eq!(env.alive_runtimes(), 0);
}

#[test]
fn frame_locals_die_with_their_frame() {
    static NODE: TypeRecord = TypeRecord::object("app.Node", 24);

    let env: &'static RuntimeEnv = Box::leak(Box::new(RuntimeEnv::new()));
    thread::spawn(move || {
        attach_if_needed_in(env, &HOOKS);
        let memory = sable_memory::current_memory();

        let mut frame: [ObjRef; 3] = [ptr::null_mut(); 3];
        // SAFETY: the frame array outlives its registration.
        unsafe {
            ops::enter_frame(frame.as_mut_ptr(), 0, 3);
            ops::set_stack_ref(&mut frame[0], ops::alloc_instance(&NODE));
            ops::set_stack_ref(&mut frame[1], ops::alloc_instance(&NODE));
            assert_eq!((*memory).live_objects(), 2);
            ops::leave_frame(frame.as_mut_ptr(), 0, 3);
            assert_eq!((*memory).live_objects(), 0);
        }
        detach_if_needed();
    })
    .join()
    .expect("scenario thread panicked");
}
