#![no_main]

use imagepix::engine::handoff::STORAGE_KEY;
use imagepix::engine::{MemorySessionStore, SessionStore, ToolChain};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    let store = MemorySessionStore::new();
    if store.set(STORAGE_KEY, raw.to_string()).is_err() {
        return;
    }
    let chain = ToolChain::new(&store);
    // Whatever was stored, reading it is one-shot.
    let _ = chain.take();
    assert!(!chain.has());
});
