
mod exact;
mod persistence;
mod properties;
mod verifier;
