use itertools::Itertools;
use serde::Serialize;

/// Kline WebSocket message deserialisation.
pub mod kline;

/// REST kline history backfill.
pub mod backfill;

/// Reconnecting live kline feed.
pub mod stream;

/// [`Bybit`](https://www.bybit.com) linear perpetuals public WebSocket url.
///
/// See docs: <https://bybit-exchange.github.io/docs/v5/ws/connect>
pub const BASE_URL_LINEAR: &str = "wss://stream.bybit.com/v5/public/linear";

/// Bybit REST api base url.
pub const BASE_URL_REST: &str = "https://api.bybit.com";

/// Maximum number of topics sent in a single subscribe request.
pub const MAX_TOPICS_PER_SUBSCRIBE: usize = 10;

/// Application level heartbeat expected by Bybit to keep the connection alive.
pub const PING_MESSAGE: &str = r#"{"op":"ping"}"#;

/// Bybit WebSocket channel name.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct BybitChannel(pub &'static str);

impl BybitChannel {
    /// One minute kline channel.
    ///
    /// See docs: <https://bybit-exchange.github.io/docs/v5/websocket/public/kline>
    pub const KLINE_1M: Self = Self("kline.1");

    /// Topic subscribed to for a symbol, eg/ "kline.1.BTCUSDT".
    pub fn topic(&self, symbol: &str) -> String {
        format!("{}.{symbol}", self.0)
    }
}

impl AsRef<str> for BybitChannel {
    fn as_ref(&self) -> &str {
        self.0
    }
}

/// Serialised subscribe requests for every symbol on `channel`, chunked into
/// [`MAX_TOPICS_PER_SUBSCRIBE`] topics per request.
pub fn subscribe_requests<S>(channel: BybitChannel, symbols: &[S]) -> Vec<String>
where
    S: AsRef<str>,
{
    symbols
        .iter()
        .map(|symbol| channel.topic(symbol.as_ref()))
        .chunks(MAX_TOPICS_PER_SUBSCRIBE)
        .into_iter()
        .map(|chunk| {
            let args = chunk.collect::<Vec<_>>();
            serde_json::json!({ "op": "subscribe", "args": args }).to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kline_topic() {
        assert_eq!(BybitChannel::KLINE_1M.topic("BTCUSDT"), "kline.1.BTCUSDT");
    }

    #[test]
    fn test_subscribe_requests_chunked() {
        struct TestCase {
            input: usize,
            expected_requests: usize,
        }

        let tests = vec![
            TestCase {
                // TC0: no symbols, no requests
                input: 0,
                expected_requests: 0,
            },
            TestCase {
                // TC1: exactly one full chunk
                input: 10,
                expected_requests: 1,
            },
            TestCase {
                // TC2: partial trailing chunk
                input: 23,
                expected_requests: 3,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let symbols = (0..test.input)
                .map(|n| format!("C{n}USDT"))
                .collect::<Vec<_>>();
            let actual = subscribe_requests(BybitChannel::KLINE_1M, &symbols);
            assert_eq!(actual.len(), test.expected_requests, "TC{} failed", index);
        }
    }

    #[test]
    fn test_subscribe_request_format() {
        let requests = subscribe_requests(BybitChannel::KLINE_1M, &["BTCUSDT", "ETHUSDT"]);
        let value = serde_json::from_str::<serde_json::Value>(&requests[0]).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "op": "subscribe",
                "args": ["kline.1.BTCUSDT", "kline.1.ETHUSDT"]
            })
        );
    }
}
