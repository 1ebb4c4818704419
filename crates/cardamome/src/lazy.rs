//! Deferred output fragments.
//!
//! Rendering produces a tree of [`Chunk`]s rather than a flat string. A
//! template's main body is wrapped in a [`Deferred`] thunk that runs only when
//! the fragment is flattened, once every template of an inheritance chain has
//! been instantiated. Function calls inside a body run immediately and return
//! plain fragments.
//!
//! # Flattening
//!
//! ```text
//! Fragment [ "a", Deferred(f), Fragment [ "b" ], "c" ]
//!                     ↓ force (once)
//!               Fragment [ "x" ]
//! → "a" "x" "b" "c"
//! ```
//!
//! Flattening is depth-first in append order. A thunk runs at most once;
//! flattening the same fragment again reuses the cached output.

use crate::error::RenderError;
use miette::Result;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// One piece of rendered output.
#[derive(Clone)]
pub enum Chunk {
    /// Final text, already escaped as needed
    Text(Rc<str>),
    /// A nested fragment (for example the result of a function call)
    Fragment(Fragment),
    /// Output that has not been computed yet
    Deferred(Deferred),
}

impl Chunk {
    pub fn text(s: impl Into<Rc<str>>) -> Self {
        Chunk::Text(s.into())
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chunk::Text(t) => write!(f, "Text({t:?})"),
            Chunk::Fragment(frag) => write!(f, "{frag:?}"),
            Chunk::Deferred(d) => write!(f, "{d:?}"),
        }
    }
}

/// An immutable, cheaply clonable sequence of chunks.
///
/// Fragments are "safe" output: they are appended without escaping.
#[derive(Clone, Default)]
pub struct Fragment {
    chunks: Rc<Vec<Chunk>>,
}

impl Fragment {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks: Rc::new(chunks),
        }
    }

    /// A fragment holding a single literal string.
    pub fn text(s: impl Into<Rc<str>>) -> Self {
        Self::new(vec![Chunk::Text(s.into())])
    }

    /// A fragment whose content is computed on first flatten.
    pub fn deferred(thunk: impl FnOnce() -> Result<Fragment> + 'static) -> Self {
        Self::new(vec![Chunk::Deferred(Deferred::new(thunk))])
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Flatten into a stream of text pieces.
    pub fn stream(&self) -> Stream {
        Stream {
            stack: vec![(self.clone(), 0)],
            done: false,
            on_drop: None,
        }
    }

    /// Flatten fully into a string, forcing every deferred piece.
    pub fn render(&self) -> Result<String> {
        let mut out = String::new();
        for piece in self.stream() {
            out.push_str(&piece?);
        }
        Ok(out)
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.chunks.iter()).finish()
    }
}

type Thunk = Box<dyn FnOnce() -> Result<Fragment>>;

enum State {
    Pending(Thunk),
    Running,
    Done(Fragment),
    Failed(Failure),
}

/// The error a thunk failed with, kept so that forcing it again reports the
/// same thing. Render errors keep their type and position.
#[derive(Clone)]
enum Failure {
    Render(RenderError),
    Other(String),
}

impl Failure {
    fn capture(err: &miette::Report) -> Self {
        match err.downcast_ref::<RenderError>() {
            Some(render) => Failure::Render(render.clone()),
            None => Failure::Other(err.to_string()),
        }
    }

    fn report(&self) -> miette::Report {
        match self {
            Failure::Render(render) => render.clone().into(),
            Failure::Other(message) => miette::miette!("{message}"),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Render(render) => write!(f, "{render}"),
            Failure::Other(message) => f.write_str(message),
        }
    }
}

/// A thunk producing a fragment, forced at most once.
#[derive(Clone)]
pub struct Deferred(Rc<RefCell<State>>);

impl Deferred {
    pub fn new(thunk: impl FnOnce() -> Result<Fragment> + 'static) -> Self {
        Self(Rc::new(RefCell::new(State::Pending(Box::new(thunk)))))
    }

    pub fn is_forced(&self) -> bool {
        matches!(&*self.0.borrow(), State::Done(_) | State::Failed(_))
    }

    /// Run the thunk if it has not run yet and return its output.
    ///
    /// A thunk that (directly or indirectly) forces itself fails instead of
    /// recursing forever. A failed thunk keeps failing with the same error.
    pub fn force(&self) -> Result<Fragment> {
        let state = std::mem::replace(&mut *self.0.borrow_mut(), State::Running);
        match state {
            State::Pending(thunk) => {
                // The borrow is released here; the thunk may force other deferreds.
                let result = thunk();
                let mut slot = self.0.borrow_mut();
                match result {
                    Ok(fragment) => {
                        *slot = State::Done(fragment.clone());
                        Ok(fragment)
                    }
                    Err(err) => {
                        *slot = State::Failed(Failure::capture(&err));
                        Err(err)
                    }
                }
            }
            State::Running => Err(miette::miette!(
                "deferred output depends on itself and can never be produced"
            )),
            State::Done(fragment) => {
                *self.0.borrow_mut() = State::Done(fragment.clone());
                Ok(fragment)
            }
            State::Failed(failure) => {
                let err = failure.report();
                *self.0.borrow_mut() = State::Failed(failure);
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0.borrow() {
            State::Pending(_) => write!(f, "Deferred(pending)"),
            State::Running => write!(f, "Deferred(running)"),
            State::Done(frag) => write!(f, "Deferred({frag:?})"),
            State::Failed(failure) => write!(f, "Deferred(failed: {failure})"),
        }
    }
}

/// Depth-first iterator over the text of a fragment tree.
///
/// Deferred chunks are forced as the iterator reaches them. After the first
/// error the stream yields nothing more.
pub struct Stream {
    stack: Vec<(Fragment, usize)>,
    done: bool,
    on_drop: Option<Box<dyn FnOnce()>>,
}

impl Stream {
    /// Run `cleanup` once the stream is dropped (used to release per-render
    /// state that the fragments keep alive).
    pub fn with_cleanup(mut self, cleanup: impl FnOnce() + 'static) -> Self {
        self.on_drop = Some(Box::new(cleanup));
        self
    }
}

impl Iterator for Stream {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let Some((fragment, index)) = self.stack.last_mut() else {
                self.done = true;
                return None;
            };
            let Some(chunk) = fragment.chunks.get(*index).cloned() else {
                self.stack.pop();
                continue;
            };
            *index += 1;
            match chunk {
                Chunk::Text(text) => {
                    if !text.is_empty() {
                        return Some(Ok(text.to_string()));
                    }
                }
                Chunk::Fragment(inner) => self.stack.push((inner, 0)),
                Chunk::Deferred(deferred) => match deferred.force() {
                    Ok(inner) => self.stack.push((inner, 0)),
                    Err(err) => {
                        self.done = true;
                        self.stack.clear();
                        return Some(Err(err));
                    }
                },
            }
        }
    }
}

impl std::iter::FusedIterator for Stream {}

impl Drop for Stream {
    fn drop(&mut self) {
        self.stack.clear();
        if let Some(cleanup) = self.on_drop.take() {
            cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_flatten_in_append_order() {
        let inner = Fragment::new(vec![Chunk::text("b"), Chunk::text("c")]);
        let frag = Fragment::new(vec![
            Chunk::text("a"),
            Chunk::Fragment(inner),
            Chunk::Deferred(Deferred::new(|| Ok(Fragment::text("d")))),
            Chunk::text("e"),
        ]);
        assert_eq!(frag.render().unwrap(), "abcde");
    }

    #[test]
    fn test_deferred_runs_once() {
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        let deferred = Deferred::new(move || {
            counter.set(counter.get() + 1);
            Ok(Fragment::text("x"))
        });
        let frag = Fragment::new(vec![
            Chunk::Deferred(deferred.clone()),
            Chunk::Deferred(deferred.clone()),
        ]);
        assert_eq!(frag.render().unwrap(), "xx");
        assert_eq!(frag.render().unwrap(), "xx");
        assert_eq!(count.get(), 1);
        assert!(deferred.is_forced());
    }

    #[test]
    fn test_thunk_runs_only_when_flattened() {
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let frag = Fragment::deferred(move || {
            flag.set(true);
            Ok(Fragment::default())
        });
        assert!(!ran.get());
        frag.render().unwrap();
        assert!(ran.get());
    }

    #[test]
    fn test_stream_stops_after_error() {
        let frag = Fragment::new(vec![
            Chunk::text("ok"),
            Chunk::Deferred(Deferred::new(|| Err(miette::miette!("boom")))),
            Chunk::text("never"),
        ]);
        let pieces: Vec<_> = frag.stream().collect();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].as_ref().unwrap(), "ok");
        assert!(pieces[1].is_err());
    }

    #[test]
    fn test_failure_keeps_its_render_error() {
        let deferred = Deferred::new(|| {
            Err(RenderError {
                message: "boom".to_string(),
                filename: "page.html".to_string(),
                line: 3,
                help: None,
                span: None,
                src: crate::error::TemplateSource::new("page.html", "").named_source(),
            }
            .into())
        });
        for _ in 0..2 {
            let err = deferred.force().unwrap_err();
            let render = err.downcast_ref::<RenderError>().expect("a render error");
            assert_eq!(render.filename, "page.html");
            assert_eq!(render.line, 3);
        }

        let plain = Deferred::new(|| Err(miette::miette!("plain")));
        assert!(plain.force().is_err());
        assert_eq!(plain.force().unwrap_err().to_string(), "plain");
    }

    #[test]
    fn test_self_dependent_deferred_fails() {
        let slot: Rc<RefCell<Option<Deferred>>> = Rc::new(RefCell::new(None));
        let inner = slot.clone();
        let deferred = Deferred::new(move || {
            let me = inner.borrow().clone();
            match me {
                Some(d) => d.force(),
                None => Ok(Fragment::default()),
            }
        });
        *slot.borrow_mut() = Some(deferred.clone());
        assert!(deferred.force().is_err());
    }

    #[test]
    fn test_cleanup_runs_on_drop() {
        let dropped = Rc::new(Cell::new(false));
        let flag = dropped.clone();
        let stream = Fragment::text("x").stream().with_cleanup(move || flag.set(true));
        drop(stream);
        assert!(dropped.get());
    }
}
