/// `Bybit` linear perpetuals kline ingestion.
pub mod bybit;
