use anyhow::{Context, Result};

/// Response that the daemon may send as a response to a command.
/// This is used in `DaemonCommand`s that contain a response sender.
#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, derive_more::Display)]
pub enum DaemonResponse {
    Success(String),
    Failure(String),
}

#[derive(Debug)]
pub struct DaemonResponseSender(tokio::sync::mpsc::UnboundedSender<DaemonResponse>);

pub fn create_pair() -> (DaemonResponseSender, tokio::sync::mpsc::UnboundedReceiver<DaemonResponse>) {
    let (sender, recv) = tokio::sync::mpsc::unbounded_channel();
    (DaemonResponseSender(sender), recv)
}

impl DaemonResponseSender {
    pub fn send_success(&self, s: String) -> Result<()> {
        self.0.send(DaemonResponse::Success(s)).context("Failed to send success response from application thread")
    }

    pub fn send_failure(&self, s: String) -> Result<()> {
        self.0.send(DaemonResponse::Failure(s)).context("Failed to send failure response from application thread")
    }

    /// Send a response based on a result, with the error formatted for the user.
    pub fn respond_with_result<T>(&self, result: Result<T>) -> Result<()> {
        match result {
            Ok(_) => self.send_success(String::new()),
            Err(e) => self.send_failure(crate::error_handling_ctx::format_error(&e)),
        }
    }
}

pub type DaemonResponseReceiver = tokio::sync::mpsc::UnboundedReceiver<DaemonResponse>;

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_respond_with_result() {
        let (sender, mut recv) = create_pair();
        sender.respond_with_result(Ok(())).unwrap();
        sender.respond_with_result::<()>(Err(anyhow::anyhow!("no such plugin"))).unwrap();
        assert_eq!(Some(DaemonResponse::Success(String::new())), recv.try_recv().ok());
        assert_eq!(Some(DaemonResponse::Failure("no such plugin".to_owned())), recv.try_recv().ok());
    }
}
