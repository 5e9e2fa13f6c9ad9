/// Declares a struct together with a `Default` impl, taking per-field
/// defaults from `= expr` and falling back to `Default::default()`.
#[macro_export]
macro_rules! default_struct {
    (
        $(#[$struct_meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $type:ty $(= $default:expr)?
            ),* $(,)?
        }
    ) => {
        $(#[$struct_meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $type
            ),*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field: $crate::default_struct!(@default $($default)?)
                    ),*
                }
            }
        }
    };
    (@default) => {
        Default::default()
    };
    (@default $expr:expr) => {
        $expr
    };
}

/// Cuts `text` to at most `max` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_chars;

    crate::default_struct! {
    #[derive(Debug)]
    struct Sample {
        pub name: String,
        pub limit: u32 = 99,
    }
    }

    #[test]
    fn test_default_struct_mixes_explicit_and_implicit_defaults() {
        let sample = Sample::default();
        assert_eq!(sample.name, "");
        assert_eq!(sample.limit, 99);
    }

    #[test]
    fn test_truncate_chars_respects_code_points() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("🔊🔊🔊", 2), "🔊🔊");
    }
}
