#![no_main]
use counter_core::persistence::RecoverySnapshot;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // anything that parses must survive its own encoding unchanged
    if let Ok(snap) = RecoverySnapshot::parse(data) {
        let again = RecoverySnapshot::parse(&snap.encode()).expect("re-parse of encoded snapshot");
        assert_eq!(snap, again);
    }
});
