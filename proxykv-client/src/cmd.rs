//! Command builder used by the facade to assemble RESP argument lists.

use std::borrow::Cow;

/// Converts a command argument into its wire bytes.
pub trait ToArg {
    fn write_arg(&self, out: &mut Vec<Vec<u8>>);
}

impl ToArg for str {
    fn write_arg(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.as_bytes().to_vec());
    }
}

impl ToArg for String {
    fn write_arg(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.as_bytes().to_vec());
    }
}

impl ToArg for Cow<'_, str> {
    fn write_arg(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.as_bytes().to_vec());
    }
}

impl ToArg for [u8] {
    fn write_arg(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.to_vec());
    }
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn write_arg(&self, out: &mut Vec<Vec<u8>>) {
        (**self).write_arg(out);
    }
}

macro_rules! integer_arg {
    ($($ty:ty),*) => {
        $(
            impl ToArg for $ty {
                fn write_arg(&self, out: &mut Vec<Vec<u8>>) {
                    out.push(self.to_string().into_bytes());
                }
            }
        )*
    };
}

integer_arg!(i32, i64, u32, u64, usize);

impl ToArg for f64 {
    fn write_arg(&self, out: &mut Vec<Vec<u8>>) {
        out.push(format_double(*self).into_bytes());
    }
}

/// Formats a score the way the store parses it (`inf`, `-inf`, shortest
/// round-trip decimal otherwise).
pub(crate) fn format_double(value: f64) -> String {
    if value.is_infinite() {
        if value > 0.0 {
            "+inf".to_string()
        } else {
            "-inf".to_string()
        }
    } else {
        value.to_string()
    }
}

/// One store command and its arguments.
#[derive(Debug, Clone)]
pub struct Cmd {
    args: Vec<Vec<u8>>,
}

impl Cmd {
    /// Starts a command with the given name.
    pub fn new(name: &str) -> Self {
        Cmd {
            args: vec![name.as_bytes().to_vec()],
        }
    }

    /// Appends one argument.
    pub fn arg<A: ToArg>(mut self, arg: A) -> Self {
        arg.write_arg(&mut self.args);
        self
    }

    /// Appends every item of `args`.
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        for arg in args {
            arg.write_arg(&mut self.args);
        }
        self
    }

    /// Appends `arg` only when `condition` holds.
    pub fn arg_if<A: ToArg>(self, condition: bool, arg: A) -> Self {
        if condition {
            self.arg(arg)
        } else {
            self
        }
    }

    /// Command name as sent.
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// Full argument list including the command name.
    pub fn as_args(&self) -> &[Vec<u8>] {
        &self.args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_mixed_arguments() {
        let cmd = Cmd::new("ZADD").arg("key").arg(1.5f64).arg("m").arg(3i64);
        let args: Vec<&[u8]> = cmd.as_args().iter().map(|a| a.as_slice()).collect();
        assert_eq!(args, vec![&b"ZADD"[..], b"key", b"1.5", b"m", b"3"]);
    }

    #[test]
    fn formats_infinite_scores() {
        assert_eq!(format_double(f64::INFINITY), "+inf");
        assert_eq!(format_double(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_double(2.0), "2");
    }

    #[test]
    fn optional_arguments() {
        let cmd = Cmd::new("SORT").arg("k").arg_if(true, "DESC").arg_if(false, "ALPHA");
        assert_eq!(cmd.as_args().len(), 3);
    }
}
