#![no_main]

use imagepix::engine::{CodecParams, EncodeTask, LimitConfig, Source, TaskOp};
use imagepix::OutputFormat;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // Strict limits keep decompression bombs from exhausting the fuzzer.
    let task = EncodeTask::from_source(
        Source::from_bytes(data.to_vec()),
        TaskOp::Convert {
            max_width: Some(256),
            max_height: Some(256),
        },
        OutputFormat::Png,
        CodecParams::Lossless,
    )
    .with_limits(LimitConfig::strict());

    let _ = task.run();
});
