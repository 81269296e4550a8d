use std::fmt;

use tokio::sync::watch;

use crate::error::LinkError;

/// Lifecycle state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Which side initiates the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Observable link state shared by the sender and receiver sides.
///
/// Backed by a watch channel so that a blocked `receive` (or `send`) wakes
/// as soon as the other side faults or closes the link.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<LinkState>,
}

impl StateCell {
    pub(crate) fn new(initial: LinkState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub(crate) fn get(&self) -> LinkState {
        *self.tx.borrow()
    }

    pub(crate) fn set(&self, state: LinkState) {
        let previous = self.tx.send_replace(state);
        if previous != state {
            tracing::trace!(from = %previous, to = %state, "link state change");
        }
    }

    /// Move a connected link to `Faulted`. Other states are left alone.
    pub(crate) fn fault(&self) {
        self.tx.send_if_modified(|state| {
            if *state == LinkState::Connected {
                *state = LinkState::Faulted;
                true
            } else {
                false
            }
        });
    }

    /// Begin a connection attempt from `Disconnected`.
    ///
    /// The link returns to `Disconnected` when the attempt is dropped without
    /// [`ConnectAttempt::succeed`], including when the connect future is
    /// cancelled.
    pub(crate) fn begin_connect(&self) -> Result<ConnectAttempt<'_>, LinkError> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|state| match *state {
            LinkState::Disconnected => {
                *state = LinkState::Connecting;
                true
            }
            LinkState::Faulted => {
                outcome = Err(LinkError::LinkFaulted(
                    "close the link before reconnecting".to_string(),
                ));
                false
            }
            LinkState::Connecting | LinkState::Connected => {
                outcome = Err(LinkError::AlreadyConnected);
                false
            }
        });
        outcome.map(|()| ConnectAttempt {
            cell: self,
            done: false,
        })
    }

    /// Error for an operation attempted while not connected.
    pub(crate) fn check_connected(&self) -> Result<(), LinkError> {
        state_error(self.get())
    }

    /// Resolves once the link leaves `Connected`, with the matching error.
    pub(crate) async fn left_connected(&self) -> LinkError {
        let mut rx = self.tx.subscribe();
        let state = match rx.wait_for(|state| *state != LinkState::Connected).await {
            Ok(state) => *state,
            Err(_) => LinkState::Disconnected,
        };
        match state_error(state) {
            Err(err) => err,
            Ok(()) => LinkError::NotConnected,
        }
    }
}

/// In-flight connection attempt on a [`StateCell`].
pub(crate) struct ConnectAttempt<'a> {
    cell: &'a StateCell,
    done: bool,
}

impl ConnectAttempt<'_> {
    pub(crate) fn succeed(mut self) {
        self.done = true;
        self.cell.set(LinkState::Connected);
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.cell.set(LinkState::Disconnected);
        }
    }
}

fn state_error(state: LinkState) -> Result<(), LinkError> {
    match state {
        LinkState::Connected => Ok(()),
        LinkState::Faulted => Err(LinkError::LinkFaulted("link is faulted".to_string())),
        LinkState::Disconnected | LinkState::Connecting => Err(LinkError::NotConnected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_only_from_connected() {
        let cell = StateCell::new(LinkState::Disconnected);
        cell.fault();
        assert_eq!(cell.get(), LinkState::Disconnected);

        cell.set(LinkState::Connected);
        cell.fault();
        assert_eq!(cell.get(), LinkState::Faulted);
        assert!(matches!(
            cell.check_connected(),
            Err(LinkError::LinkFaulted(_))
        ));
    }

    #[test]
    fn begin_connect_requires_disconnected() {
        let cell = StateCell::new(LinkState::Disconnected);
        let attempt = cell.begin_connect().unwrap();
        assert_eq!(cell.get(), LinkState::Connecting);
        assert!(matches!(
            cell.begin_connect(),
            Err(LinkError::AlreadyConnected)
        ));
        drop(attempt);
        assert_eq!(cell.get(), LinkState::Disconnected);

        cell.begin_connect().unwrap().succeed();
        assert_eq!(cell.get(), LinkState::Connected);

        cell.set(LinkState::Faulted);
        assert!(matches!(
            cell.begin_connect(),
            Err(LinkError::LinkFaulted(_))
        ));
    }

    #[tokio::test]
    async fn left_connected_wakes_on_fault() {
        let cell = std::sync::Arc::new(StateCell::new(LinkState::Connected));
        let waiter = {
            let cell = std::sync::Arc::clone(&cell);
            tokio::spawn(async move { cell.left_connected().await })
        };
        tokio::task::yield_now().await;
        cell.fault();
        let err = waiter.await.unwrap();
        assert!(matches!(err, LinkError::LinkFaulted(_)));
    }
}
