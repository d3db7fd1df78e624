pub mod checksum;
pub mod mrz;
pub mod normalizer;
pub mod repair;

pub use checksum::MrzChecksum;
pub use mrz::{MrzDates, MrzLayout, MrzValidator};
pub use normalizer::MrzTextNormalizer;
pub use repair::MrzRepair;
