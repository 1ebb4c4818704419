//! cardamome - directive-based markup and text templates
//!
//! Templates are compiled once and rendered many times:
//!
//! ```text
//! source ─► markup/text front end ─► directive tree ─► IR ─► ops ─► runtime ─► stream
//! ```
//!
//! # Syntax Overview
//!
//! ```text
//! $name, ${expr}                       - Interpolation (escaped unless safe)
//! <li py:for="x in xs">$x</li>         - Loops
//! <p py:if="cond">..</p><py:else>..</py:else>
//! <div py:switch="v"><py:case value="1">..</py:case><py:else>..</py:else></div>
//! <py:def function="item(label)">..</py:def>
//! <div py:block="content">..</div>     - Overridable blocks
//! <py:extends href="base.html"/>       - Inheritance
//! <py:import href="lib.html" alias="lib"/>
//! <py:include href="footer.html"/>
//! <?py x = 1 ?>                        - Embedded statements
//! ```
//!
//! Text templates use `%for x in xs` / `%end` lines, or `{%if x%}` inline.
//!
//! # Example
//!
//! ```ignore
//! use cardamome::{CompileOptions, Context, NullLoader, Template};
//! use std::sync::Arc;
//!
//! let template = Template::from_markup("hello.html", "<p>Hello, $name!</p>", &CompileOptions::default())?;
//! let output = Arc::new(template).render(Context::new().with("name", "World"), Arc::new(NullLoader))?;
//! assert_eq!(output, "<p>Hello, World!</p>");
//! ```

pub mod ast;
mod builtins;
pub mod compiler;
pub mod doctype;
mod error;
mod eval;
pub mod ir;
mod lazy;
pub mod lexer;
pub mod loader;
pub mod lower;
pub mod markup;
pub mod parser;
mod runtime;
mod scan;
mod template;
pub mod text;
pub mod tree;

pub use compiler::CompileOptions;
pub use doctype::Mode;
pub use error::{
    ArgumentError, CompileError, LoaderError, ParseError, RenderError, SyntaxError, TemplateSource, TypeError,
    UndefinedError, UnknownFieldError, UnknownFilterError,
};
pub use eval::{Callable, Namespace, Val, Value, ValueExt};
pub use lazy::{Chunk, Deferred, Fragment, Stream};
pub use loader::{FileLoader, Loader, LoaderOptions, MemoryLoader, NullLoader, TemplateKind};
pub use runtime::Context;
pub use template::{Function, Template};

// Re-export facet_value types for convenience
pub use facet_value::{VArray, VObject, VSafeString, VString};
