pub mod market_data;
