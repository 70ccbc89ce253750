//! # Pipelines over bounded queues.
//!
//! - [`source`], [`from_iter`]: producers
//! - [`Pipe::stage`], [`Pipe::try_stage`]: one task per stage
//! - [`Pipe::fan_out`]: `n` parallel branches, optionally order-preserving
//! - [`fan_in`]: merge several pipes
//! - [`Pipe::sink`], [`Pipe::collect`]: terminal operations
//!
//! ```rust
//! use concur::Context;
//! use concur::pipeline::from_iter;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), concur::Error> {
//! let ctx = Context::background();
//! let squares = from_iter(&ctx, 4, 1..=4u32)
//!     .stage(2, |x| async move { x * x })
//!     .collect()
//!     .await?;
//! assert_eq!(squares, vec![1, 4, 9, 16]);
//! # Ok(())
//! # }
//! ```

mod fan;
mod pipe;

pub use fan::fan_in;
pub use pipe::{from_iter, source, Pipe};
