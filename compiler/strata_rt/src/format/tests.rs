use super::*;
use pretty_assertions::assert_eq;

fn no_strings(_: u64) -> String {
    String::new()
}

#[test]
fn integers() {
    let s = format(
        "%d %u %lld %llu %x%%",
        &[u64::from((-3i32) as u32), 7, (-9i64) as u64, u64::MAX, 255],
        FloatArgs::Promoted,
        no_strings,
    );
    assert_eq!(s, format!("-3 7 -9 {} ff%", u64::MAX));
}

#[test]
fn floats_by_mode() {
    let promoted = format("%f", &[1.5f64.to_bits()], FloatArgs::Promoted, no_strings);
    assert_eq!(promoted, "1.500000");
    let native = format(
        "%f %lf",
        &[u64::from(0.25f32.to_bits()), 2.0f64.to_bits()],
        FloatArgs::Native,
        no_strings,
    );
    assert_eq!(native, "0.250000 2.000000");
}

#[test]
fn strings_and_chars() {
    let s = format(
        "[%s] %c",
        &[40, u64::from(b'z')],
        FloatArgs::Promoted,
        |addr| format!("str@{addr}"),
    );
    assert_eq!(s, "[str@40] z");
}

#[test]
fn missing_arguments_and_unknown_conversions() {
    assert_eq!(format("%d %q", &[], FloatArgs::Promoted, no_strings), "0 %q");
    assert_eq!(format("100%", &[], FloatArgs::Promoted, no_strings), "100%");
}
