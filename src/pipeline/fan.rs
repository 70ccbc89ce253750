//! # Fan-out and fan-in.
//!
//! ```text
//! fan_out(n):                       ┌─► branch 0 ─┐
//!   input ──► dispatcher ──(free)───┼─► branch 1 ─┼──► merged output      (unordered)
//!                  │                └─► branch n ─┘
//!                  └──► order tickets ──► sequencer ──► output             (ordered)
//!
//! fan_in:  pipe A ──► forwarder ─┐
//!          pipe B ──► forwarder ─┼──► merged output
//!          pipe C ──► forwarder ─┘
//! ```
//!
//! ## Rules
//! - The dispatcher hands each item to whichever branch has room first.
//! - Ordered mode: the dispatcher records which branch got each item; the
//!   sequencer reads branch outputs in that order. Each branch is FIFO, so
//!   output order equals input order without an unbounded reorder buffer.
//! - Fan-in order across inputs is unspecified. An input that ends because
//!   its own context fired cancels the merged pipeline.

use std::future::Future;
use std::sync::Arc;

use futures::future::select_all;
use futures::FutureExt;
use tokio::sync::mpsc;

use crate::context::{CancelHandle, Context};
use crate::error::{BoxError, Error};
use crate::pipeline::pipe::{pump, zero_bound, Pipe};

impl<T: Send + 'static> Pipe<T> {
    /// Runs `n` copies of `f` over the items.
    ///
    /// Output order follows input order only when `ordered` is `true`.
    pub fn fan_out<U, F, Fut>(self, n: usize, capacity: usize, ordered: bool, f: F) -> Pipe<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = U> + Send + 'static,
    {
        self.try_fan_out(n, capacity, ordered, move |item| {
            f(item).map(Ok::<U, BoxError>)
        })
    }

    /// Fallible [`fan_out`](Self::fan_out): an `Err` from any branch fails the pipeline.
    pub fn try_fan_out<U, E, F, Fut>(
        self,
        n: usize,
        capacity: usize,
        ordered: bool,
        f: F,
    ) -> Pipe<U>
    where
        U: Send + 'static,
        E: Into<BoxError> + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U, E>> + Send + 'static,
    {
        if self.misconfig.is_some() || n == 0 || capacity == 0 {
            let reason = zero_bound("parallelism", n).or_else(|| zero_bound("capacity", capacity));
            return self.poisoned(reason);
        }
        let Pipe {
            rx,
            ctx,
            abort,
            cancels,
            mut tasks,
            misconfig,
        } = self;
        let f = Arc::new(f);

        let (merged_tx, merged_rx) = mpsc::channel::<U>(capacity);
        let mut branch_inputs = Vec::with_capacity(n);
        let mut branch_outputs = Vec::with_capacity(if ordered { n } else { 0 });
        for _ in 0..n {
            let (in_tx, in_rx) = mpsc::channel::<T>(1);
            branch_inputs.push(in_tx);
            let out_tx = if ordered {
                let (tx, rx) = mpsc::channel::<U>(capacity);
                branch_outputs.push(rx);
                tx
            } else {
                merged_tx.clone()
            };
            let f = Arc::clone(&f);
            tasks.push(tokio::spawn(pump(
                ctx.clone(),
                abort.clone(),
                in_rx,
                out_tx,
                move |item| (*f)(item),
            )));
        }

        if ordered {
            let (ticket_tx, ticket_rx) = mpsc::channel::<usize>(n + capacity);
            tasks.push(tokio::spawn(dispatch(
                ctx.clone(),
                rx,
                branch_inputs,
                Some(ticket_tx),
            )));
            tasks.push(tokio::spawn(sequence(
                ctx.clone(),
                ticket_rx,
                branch_outputs,
                merged_tx,
            )));
        } else {
            drop(merged_tx);
            tasks.push(tokio::spawn(dispatch(ctx.clone(), rx, branch_inputs, None)));
        }

        Pipe {
            rx: merged_rx,
            ctx,
            abort,
            cancels,
            tasks,
            misconfig,
        }
    }
}

/// Merges several pipes into one.
///
/// A zero `capacity`, or a mis-sized input, makes the merged pipe fail
/// with `InvalidConfig` at its terminal operation.
pub fn fan_in<T: Send + 'static>(ctx: &Context, capacity: usize, pipes: Vec<Pipe<T>>) -> Pipe<T> {
    let (mctx, abort) = ctx.with_cancel();
    let mut misconfig = zero_bound("capacity", capacity);
    let mut cancels = vec![abort.clone()];
    let mut tasks = Vec::new();
    let mut inputs = Vec::with_capacity(pipes.len());

    for pipe in pipes {
        let Pipe {
            rx: in_rx,
            ctx: in_ctx,
            abort: _,
            cancels: in_cancels,
            tasks: in_tasks,
            misconfig: in_misconfig,
        } = pipe;
        misconfig = misconfig.or(in_misconfig);
        cancels.extend(in_cancels);
        tasks.extend(in_tasks);
        inputs.push((in_ctx, in_rx));
    }

    if misconfig.is_some() {
        let stub: Pipe<T> = Pipe {
            rx: mpsc::channel(1).1,
            ctx: mctx,
            abort,
            cancels,
            tasks,
            misconfig: None,
        };
        return stub.poisoned(misconfig);
    }

    let (tx, rx) = mpsc::channel(capacity);
    for (in_ctx, in_rx) in inputs {
        tasks.push(tokio::spawn(forward(
            mctx.clone(),
            abort.clone(),
            in_ctx,
            in_rx,
            tx.clone(),
        )));
    }
    drop(tx);

    Pipe {
        rx,
        ctx: mctx,
        abort,
        cancels,
        tasks,
        misconfig: None,
    }
}

async fn dispatch<T: Send>(
    ctx: Context,
    mut rx: mpsc::Receiver<T>,
    branches: Vec<mpsc::Sender<T>>,
    tickets: Option<mpsc::Sender<usize>>,
) -> Result<(), Error> {
    loop {
        let free = select_all(branches.iter().map(|tx| Box::pin(tx.reserve())));
        let Ok((Ok(permit), idx, _)) = ctx.run(free).await else {
            return Ok(());
        };
        let ticket = match &tickets {
            Some(t) => match ctx.run(t.reserve()).await {
                Ok(Ok(p)) => Some(p),
                _ => return Ok(()),
            },
            None => None,
        };
        let Ok(Some(item)) = ctx.run(rx.recv()).await else {
            return Ok(());
        };
        if let Some(ticket) = ticket {
            ticket.send(idx);
        }
        permit.send(item);
    }
}

async fn sequence<U: Send>(
    ctx: Context,
    mut tickets: mpsc::Receiver<usize>,
    mut branches: Vec<mpsc::Receiver<U>>,
    tx: mpsc::Sender<U>,
) -> Result<(), Error> {
    loop {
        let Ok(Ok(permit)) = ctx.run(tx.reserve()).await else {
            return Ok(());
        };
        let Ok(Some(idx)) = ctx.run(tickets.recv()).await else {
            return Ok(());
        };
        let Some(branch) = branches.get_mut(idx) else {
            return Ok(());
        };
        let Ok(Some(item)) = ctx.run(branch.recv()).await else {
            return Ok(());
        };
        permit.send(item);
    }
}

async fn forward<T: Send>(
    ctx: Context,
    abort: CancelHandle,
    upstream: Context,
    mut rx: mpsc::Receiver<T>,
    tx: mpsc::Sender<T>,
) -> Result<(), Error> {
    loop {
        let Ok(Ok(permit)) = ctx.run(tx.reserve()).await else {
            return Ok(());
        };
        match ctx.run(rx.recv()).await {
            Ok(Some(item)) => permit.send(item),
            Ok(None) => {
                if upstream.is_done() {
                    abort.cancel();
                }
                return Ok(());
            }
            Err(_) => return Ok(()),
        }
    }
}
