pub mod health;
pub mod prediction;
pub mod system;

#[cfg(test)]
pub(crate) mod test_support;
