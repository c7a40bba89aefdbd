mod checksum;
mod credentials;

pub use checksum::{sha256_hex, sha256_hex_file, sha512_base64, verify_sha512_base64};
pub use credentials::{
    ConsoleCredentialProvider, CredentialProvider, CredentialRequest, CredentialResponse,
    CredentialService, Credentials, PluginCredentialProvider, StaticCredentialProvider,
};
