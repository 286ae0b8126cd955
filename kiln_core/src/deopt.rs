//! Deoptimization reasons.
//!
//! A `DeoptCheck` gate carries one of these next to its condition and frame
//! state. When the condition fails at run time the reason is reported with the
//! reconstructed frame.

use std::fmt;

macro_rules! deopt_types {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Why a speculative guard failed.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum DeoptType {
            $(
                #[doc = $name]
                $variant,
            )*
        }

        impl DeoptType {
            /// Every reason, in discriminant order.
            pub const ALL: &'static [DeoptType] = &[$(DeoptType::$variant),*];

            /// Display name.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(DeoptType::$variant => $name,)*
                }
            }
        }
    };
}

deopt_types! {
    Generic => "generic",
    NotInt => "not int",
    NotDouble => "not double",
    NotNumber => "not number",
    NotBool => "not bool",
    NotHeapObject => "not heap object",
    NotString => "not string",
    NotArray => "not array",
    NotStableArray => "not stable array",
    NotF32Array => "not f32 array",
    WrongHClass => "wrong hclass",
    NotNewObj => "not new obj",
    NotArrayIdx => "not array idx",
    NotF32ArrayIdx => "not f32 array idx",
    NotIncOverflow => "inc overflow",
    NotDecOverflow => "dec overflow",
    NotNegOverflow => "neg overflow",
    NotCallTarget => "not call target",
    NotBuiltinReceiver => "not builtin receiver",
}

impl DeoptType {
    /// Decode a reason from its discriminant.
    #[must_use]
    pub fn from_u32(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }
}

impl fmt::Display for DeoptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_discriminant() {
        for &ty in DeoptType::ALL {
            assert_eq!(DeoptType::from_u32(ty as u32), Some(ty));
        }
        assert_eq!(DeoptType::from_u32(1000), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(DeoptType::NotInt.name(), "not int");
        assert_eq!(DeoptType::WrongHClass.to_string(), "wrong hclass");
    }
}
