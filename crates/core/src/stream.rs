use futures::stream::{self, Stream};
use std::time::Duration;

/// Replays an answer word by word, each token followed by a space and
/// delayed by `pace`. Every call starts a fresh stream over its own copy.
pub fn stream_words(text: &str, pace: Duration) -> impl Stream<Item = String> {
    let words: Vec<String> = text.split(' ').map(|word| format!("{word} ")).collect();

    stream::unfold(words.into_iter(), move |mut words| async move {
        let word = words.next()?;
        tokio::time::sleep(pace).await;
        Some((word, words))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn words_are_emitted_in_order_with_trailing_spaces() {
        let tokens: Vec<String> = stream_words("grounded answers only", Duration::ZERO)
            .collect()
            .await;
        assert_eq!(tokens, vec!["grounded ", "answers ", "only "]);
    }

    #[tokio::test]
    async fn streams_are_restartable() {
        let text = "one two";
        let first: Vec<String> = stream_words(text, Duration::ZERO).collect().await;
        let second: Vec<String> = stream_words(text, Duration::ZERO).collect().await;
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_delays_each_word() {
        let started = tokio::time::Instant::now();
        let tokens: Vec<String> = stream_words("a b c", Duration::from_millis(20))
            .collect()
            .await;
        assert_eq!(tokens.len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
