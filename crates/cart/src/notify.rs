//! User-facing notices emitted when a cart operation is rejected.
//!
//! Notices are fire-and-forget: the store never waits on, or learns the
//! fate of, a notice it emits.

use tokio::sync::mpsc;

/// A user-facing message about a rejected cart operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notice {
    /// Requested quantity exceeds available stock.
    OutOfStock,
    /// Adding a product failed for a reason other than stock.
    AddFailed,
    /// The product to remove is not in the cart.
    RemoveFailed,
    /// Changing a line's quantity failed for a reason other than stock.
    UpdateFailed,
}

impl Notice {
    /// Storefront copy shown to the shopper.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::OutOfStock => "Quantidade solicitada fora de estoque",
            Self::AddFailed => "Erro na adição do produto",
            Self::RemoveFailed => "Erro na remoção do produto",
            Self::UpdateFailed => "Erro na alteração de quantidade do produto",
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Sink for notices.
pub trait Notifier: Send + Sync {
    /// Emit a notice. Must not block.
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        tracing::warn!(notice = ?notice, "{}", notice.message());
    }
}

/// Forwards notices to a UI toast layer over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiver the UI drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        // Nobody listening is not an error for a fire-and-forget sink
        if self.tx.send(notice).is_err() {
            tracing::debug!(notice = ?notice, "Notice dropped, receiver closed");
        }
    }
}
