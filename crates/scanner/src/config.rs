use hue_types::Network;

/// Settings of a [`ColorScanner`](crate::ColorScanner).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_network")]
    pub network: Network,

    /// False positive rate of the bloom filter offered to peers.
    #[serde(default = "default_bloom_false_positive_rate")]
    pub bloom_false_positive_rate: f64,

    #[serde(default = "default_bloom_tweak")]
    pub bloom_tweak: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            bloom_false_positive_rate: default_bloom_false_positive_rate(),
            bloom_tweak: default_bloom_tweak(),
        }
    }
}

fn default_network() -> Network {
    Network::Bitcoin
}

fn default_bloom_false_positive_rate() -> f64 {
    0.0005
}

fn default_bloom_tweak() -> u32 {
    0
}
