use super::ChannelEndpoint;
use tokio::sync::mpsc;

/// Two endpoints wired back to back within one process.
pub fn pair() -> (ChannelEndpoint, ChannelEndpoint) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();
    (
        ChannelEndpoint::new("memory:left", left_tx, right_rx),
        ChannelEndpoint::new("memory:right", right_tx, left_rx),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assist_ipc::{CallRequest, ChannelMessage};

    #[tokio::test]
    async fn test_pair_is_crossed_and_ordered() {
        let (left, mut right) = pair();
        for n in 0..3 {
            left.send(&ChannelMessage::call(CallRequest::new(n.to_string(), "f")));
        }
        for n in 0..3 {
            let message = ChannelMessage::from_value(right.recv().await.unwrap()).unwrap();
            assert_eq!(message.request().id, n.to_string());
        }

        drop(left);
        assert!(right.recv().await.is_none());
    }
}
