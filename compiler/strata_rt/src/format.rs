//! printf-style formatting for `host_printf` and assertion messages.
//!
//! Supported conversions: `%d %i %u %ld %lld %lu %llu %f %lf %e %g %s %c %x
//! %p %%`. Each conversion consumes one raw 64-bit argument; missing
//! arguments format as zero.

/// How `%f` interprets its argument.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FloatArgs {
    /// Variadic calls promote `f32` to `f64`.
    Promoted,
    /// Assertion arguments keep their width: `%f` is `f32`, `%lf` is `f64`.
    Native,
}

pub fn format(
    template: &str,
    args: &[u64],
    floats: FloatArgs,
    read_str: impl Fn(u64) -> String,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter().copied();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut longs = 0;
        // Flags, width and precision are accepted and ignored.
        while let Some(&p) = chars.peek() {
            if p.is_ascii_digit() || matches!(p, '.' | '-' | '+' | ' ' | '#') {
                chars.next();
            } else {
                break;
            }
        }
        while chars.peek() == Some(&'l') {
            chars.next();
            longs += 1;
        }
        let Some(conv) = chars.next() else {
            out.push('%');
            break;
        };
        let mut next = || args.next().unwrap_or(0);
        match conv {
            '%' => out.push('%'),
            'd' | 'i' if longs == 0 => out.push_str(&(next() as u32 as i32).to_string()),
            'd' | 'i' => out.push_str(&(next() as i64).to_string()),
            'u' if longs == 0 => out.push_str(&(next() as u32).to_string()),
            'u' => out.push_str(&next().to_string()),
            'x' if longs == 0 => out.push_str(&format!("{:x}", next() as u32)),
            'x' => out.push_str(&format!("{:x}", next())),
            'p' => out.push_str(&format!("{:#x}", next())),
            'c' => out.push(char::from(next() as u8)),
            's' => out.push_str(&read_str(next())),
            'f' | 'e' | 'g' => {
                let bits = next();
                let v = if floats == FloatArgs::Native && longs == 0 {
                    f64::from(f32::from_bits(bits as u32))
                } else {
                    f64::from_bits(bits)
                };
                match conv {
                    'e' => out.push_str(&format!("{v:e}")),
                    'g' => out.push_str(&v.to_string()),
                    _ => out.push_str(&format!("{v:.6}")),
                }
            }
            other => {
                out.push('%');
                out.push(other);
            }
        }
    }
    out
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
