mod backend;
pub mod backends;
pub mod centerface;
mod registry;
mod result;

pub use backend::FaceDetector;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{available_backends, BackendRegistry, AUTO_BACKEND, STUB_BACKEND};
pub use result::Detection;
