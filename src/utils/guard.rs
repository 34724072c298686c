/// Runs a closure when dropped, on normal exit and during unwinding alike.
///
/// The session uses it to write its closing audit event whichever way the
/// read loop ends.
///
/// # Examples
///
/// ```
/// use rusty_gate::utils::guard::ExitGuard;
///
/// let _guard = ExitGuard::new(|| println!("session closed"));
/// // The closure runs when `_guard` goes out of scope.
/// ```
pub struct ExitGuard<F: FnOnce()> {
    on_exit: Option<F>,
}

impl<F: FnOnce()> ExitGuard<F> {
    pub fn new(f: F) -> Self {
        Self { on_exit: Some(f) }
    }

    /// Drop the guard without running the closure.
    pub fn disarm(mut self) {
        self.on_exit = None;
    }
}

impl<F: FnOnce()> Drop for ExitGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.on_exit.take() {
            f()
        }
    }
}
