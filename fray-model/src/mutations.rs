// fray-model/src/mutations.rs
//! Deterministic mutation catalogs for the leaf field types.
//!
//! The contract is "deterministic, finite, boundary-focused": a field's
//! catalog is fixed at construction and the same configuration always
//! enumerates the same values in the same order. Values equal to the default
//! or outside the representable range are skipped, so every step actually
//! changes the rendered output.

/// Representable range of a `width`-bit integer.
pub fn int_bounds(width: usize, signed: bool) -> (i128, i128) {
    if signed {
        (-(1i128 << (width - 1)), (1i128 << (width - 1)) - 1)
    } else {
        (0, (1i128 << width) - 1)
    }
}

/// Boundary-focused catalog for an integer field.
///
/// Order: 0, 1, 2, mid, max-1, max, then for signed fields -1, min, min+1,
/// then single-bit flips of the default value, low bit first.
pub fn int_mutations(default: i128, width: usize, signed: bool) -> Vec<i128> {
    let (min, max) = int_bounds(width, signed);
    let mut out: Vec<i128> = Vec::new();
    let mut push = |v: i128, out: &mut Vec<i128>| {
        if v >= min && v <= max && v != default && !out.contains(&v) {
            out.push(v);
        }
    };

    for v in [0, 1, 2, max / 2, max - 1, max] {
        push(v, &mut out);
    }
    if signed {
        for v in [-1, min, min + 1] {
            push(v, &mut out);
        }
    }
    for bit in 0..width {
        push(default ^ (1i128 << bit), &mut out);
    }
    out
}

const FORMAT_PROBE: &[u8] = b"%s%s%s%s";

/// Boundary-focused catalog for a text/byte field.
///
/// Order: empty, a single byte, the doubled default, an embedded terminator,
/// a leading terminator, a format-string probe, a 0xFF run, oversize runs of
/// 256/1024/4096 bytes, and, when a maximum length is configured, runs of
/// max-1, max and max+1 bytes.
pub fn string_mutations(default: &[u8], max_len: Option<usize>) -> Vec<Vec<u8>> {
    let mut out: Vec<Vec<u8>> = Vec::new();
    let mut push = |v: Vec<u8>, out: &mut Vec<Vec<u8>>| {
        if v != default && !out.contains(&v) {
            out.push(v);
        }
    };

    push(Vec::new(), &mut out);
    push(b"A".to_vec(), &mut out);
    push([default, default].concat(), &mut out);
    if !default.is_empty() {
        let mut embedded = default.to_vec();
        embedded.insert(default.len() / 2, 0);
        push(embedded, &mut out);
        push([&[0u8][..], default].concat(), &mut out);
    }
    push(FORMAT_PROBE.to_vec(), &mut out);
    push(vec![0xff; 16], &mut out);
    for n in [256usize, 1024, 4096] {
        push(vec![b'A'; n], &mut out);
    }
    if let Some(max) = max_len {
        for n in [max.saturating_sub(1), max, max + 1] {
            push(vec![b'A'; n], &mut out);
        }
    }
    out
}
