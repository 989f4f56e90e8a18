#![no_main]
use libfuzzer_sys::fuzz_target;
use quic_cert_compress::{decompress_chain, CommonCertSet, CommonCertSets};

static SET_CERTS: [&[u8]; 3] = [
    b"\x30\x82\x01\x00fuzz common root",
    b"\x30\x82\x01\x01fuzz common intermediate",
    b"",
];
// Hash bytes are 01..08 little-endian, so a fuzzer can find them in the corpus quickly.
static SETS: [CommonCertSet; 1] = [CommonCertSet::new(0x0807060504030201, &SET_CERTS)];
static REGISTRY: CommonCertSets = CommonCertSets::new(&SETS);

fuzz_target!(|data: &[u8]| {
    let cached: [&[u8]; 2] = [b"cached certificate one", b"cached certificate two"];
    let _ = decompress_chain(data, &cached, &REGISTRY);
});
