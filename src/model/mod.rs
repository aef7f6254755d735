//! Reactive layer: scopes, event sources and model elements.
//!
//! ## Contents
//! - [`Scope`], [`Disposable`] explicit ownership of listeners and tasks
//! - [`Listenable`], [`ListenerHandle`] named event source with scoped listeners
//! - [`ModelElement`] asynchronously resolved value with change notification
//!
//! ## Wiring
//! ```text
//! bridge response ──► ModelElement::set_future ──► settle (generation check)
//!                                                   │ changed?
//!                                                   ▼
//!                                     Listenable<(new, old)>::emit
//!                                      ├──► UI collaborators
//!                                      └──► sub_model / derive ──► child.set
//! ```

mod element;
mod listenable;
mod scope;

pub use element::{ModelElement, ModelValue};
pub use listenable::{Listenable, ListenerHandle};
pub use scope::{Disposable, Scope};
