pub mod preprocess;
pub mod yolov8;

use ort::execution_providers::CPUExecutionProvider;
#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

/// Commits the global ort environment. Returns the execution provider name.
pub fn init_runtime(cuda: bool) -> &'static str {
    #[cfg(feature = "cuda")]
    let (ep, ep_name) = if cuda {
        (CUDAExecutionProvider::default().build(), "cuda")
    } else {
        (CPUExecutionProvider::default().build(), "cpu")
    };
    #[cfg(not(feature = "cuda"))]
    let (ep, ep_name) = {
        if cuda {
            log::warn!("Built without the `cuda` feature, falling back to cpu");
        }
        (CPUExecutionProvider::default().build(), "cpu")
    };

    // Session creation reports a broken environment, the commit result only
    // says whether this call won the race to configure it.
    let _ = ort::init().with_execution_providers([ep]).commit();
    ep_name
}
