pub use lenient_requirement::{LenientRequirement, LenientVersionSpecifiers};
pub use metadata::{Error, Metadata21};
pub use release_json::{ReleaseInfo, ReleaseJson, StringOrVec};
pub use simple_json::{DistInfoMetadata, File, Hashes, SimpleJson, Yanked};

mod lenient_requirement;
mod metadata;
mod release_json;
mod simple_json;
