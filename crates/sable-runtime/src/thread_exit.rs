//! Thread-exit hook integration.
//!
//! [`register_thread_exit`] is the portable rendition of a host
//! `onThreadExit` registration: callbacks are queued in a thread-local whose
//! destructor runs them when the OS tears the thread down. The lifecycle
//! machinery uses it so a thread that simply returns still detaches its
//! runtime.
//!
//! Callbacks run in registration order during thread-local destruction. Any
//! thread-local state a callback touches must itself survive that window —
//! in practice that means const-initialized `Cell`s of `Copy` data, which
//! never register destructors of their own. On the thread that outlives
//! `main` the destructors may not run at all; by then the process is exiting
//! and the runtime dies with it.

use std::cell::RefCell;

type ExitCallback = Box<dyn FnOnce()>;

struct ExitCallbacks {
    callbacks: RefCell<Vec<ExitCallback>>,
}

impl Drop for ExitCallbacks {
    fn drop(&mut self) {
        for callback in self.callbacks.get_mut().drain(..) {
            callback();
        }
    }
}

thread_local! {
    static AT_EXIT: ExitCallbacks = ExitCallbacks {
        callbacks: RefCell::new(Vec::new()),
    };
}

/// Register `callback` to run when the current thread exits.
pub fn register_thread_exit<F>(callback: F)
where
    F: FnOnce() + 'static,
{
    AT_EXIT.with(|exit| exit.callbacks.borrow_mut().push(Box::new(callback)));
}
