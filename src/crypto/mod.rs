pub mod cipher_box;

pub use cipher_box::CipherBox;
