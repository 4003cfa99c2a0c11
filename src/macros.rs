pub use enclose::*;

#[macro_export]
macro_rules! computed {
    (( $($d_tt:tt)* ) $($b:tt)*) => {
        $crate::computed($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    ($($b:tt)*) => {
        $crate::computed(move || { $($b)* })
    };
}

#[macro_export]
macro_rules! effect {
    (( $($d_tt:tt)* ) $($b:tt)*) => {
        $crate::effect($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    ($($b:tt)*) => {
        $crate::effect(move || { $($b)* })
    };
}

#[macro_export]
macro_rules! batch {
    (( $($d_tt:tt)* ) $($b:tt)*) => {
        $crate::batch($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    ($($b:tt)*) => {
        $crate::batch(move || { $($b)* })
    };
}
