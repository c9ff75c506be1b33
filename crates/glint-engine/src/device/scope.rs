/// Runs `f` inside validation and out-of-memory error scopes and returns the
/// first error either of them captured.
///
/// Error scopes are per thread: the upload worker and the owning thread can
/// capture concurrently without seeing each other's errors.
pub(crate) fn capture<R>(
    device: &wgpu::Device,
    f: impl FnOnce() -> R,
) -> (R, Option<wgpu::Error>) {
    let out_of_memory = device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    let validation = device.push_error_scope(wgpu::ErrorFilter::Validation);

    let value = f();

    // Innermost scope first.
    let validation = pollster::block_on(validation.pop());
    let out_of_memory = pollster::block_on(out_of_memory.pop());

    (value, validation.or(out_of_memory))
}
