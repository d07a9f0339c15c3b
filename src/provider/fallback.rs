//! Locally generated reply used when no provider can serve the request.

use super::EventStream;
use crate::protocol::StreamEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Split `text` into word chunks; every chunk but the last keeps its trailing
/// space, so the chunks concatenate back to `text`.
pub fn chunks(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split(' ').collect();
    let last = words.len().saturating_sub(1);
    words
        .into_iter()
        .enumerate()
        .map(|(i, w)| if i < last { format!("{w} ") } else { w.to_string() })
        .collect()
}

/// Drip `text` as word deltas, `delay` apart, then `Done`.
pub fn stream(text: String, delay: Duration) -> EventStream {
    let (tx, rx) = mpsc::channel::<StreamEvent>(32);

    tokio::spawn(async move {
        for chunk in chunks(&text) {
            if tx.send(StreamEvent::delta(chunk)).await.is_err() {
                return;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        let _ = tx.send(StreamEvent::Done).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn chunks_concatenate_to_input() {
        let text = "one two  three\nfour ";
        let parts = chunks(text);
        assert_eq!(parts, ["one ", "two ", " ", "three\nfour ", ""]);
        assert_eq!(parts.concat(), text);
    }

    #[tokio::test]
    async fn streams_words_then_done() {
        let events: Vec<_> = stream("a b c".into(), Duration::ZERO).collect().await;
        assert_eq!(
            events,
            vec![
                StreamEvent::delta("a "),
                StreamEvent::delta("b "),
                StreamEvent::delta("c"),
                StreamEvent::Done,
            ]
        );
    }
}
