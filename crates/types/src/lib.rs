//! Core types of the Hue colored coin protocol: genesis points, color
//! definitions and the color transfer kernel.

mod errors;
pub use errors::DefinitionError;

mod network;
pub use network::{Network, NetworkParseError};

mod genesis;
pub use genesis::GenesisPoint;

pub mod padding;
pub use padding::{pad, unpad};

pub mod kernel;
pub use kernel::{apply_kernel, apply_kernel_to_values, MAX_KERNEL_OUTPUTS};

mod definition;
pub use definition::{
    ColorDefinition, ColorDefinitionBuilder, GenesisTree, DEFINITION_VERSION, NAME_KEY,
    NETWORK_KEY, STEGO_KEY_SIZE,
};

mod document;
pub use document::DefinitionDocument;

mod sorted;
pub use sorted::SortedTransaction;
