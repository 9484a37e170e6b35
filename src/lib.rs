pub mod error;
pub mod harvest;
pub mod igdb;
pub mod logging;

pub mod util {
    pub mod env;
}

#[cfg(test)]
mod testing;
