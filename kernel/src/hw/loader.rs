// kernel/src/hw/loader.rs
//
// Program images come from outside the kernel: the loader answers "open
// this name" with the load address, the length and the per-offset words.
// The on-disk format of the course toolchain is not the kernel's business;
// the in-memory `ImageSet` is what the wrapper and the tests feed it.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("no program named '{0}'")]
    NotFound(String),
}

/// A loaded executable image.
#[derive(Debug, Clone)]
pub struct ProgramImage {
    load_addr: usize,
    words: Vec<i32>,
}

impl ProgramImage {
    pub fn new(load_addr: usize, words: Vec<i32>) -> Self {
        Self { load_addr, words }
    }

    /// Address the image expects to be placed at.
    pub fn load_addr(&self) -> usize {
        self.load_addr
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Word at `offset` from the start of the image; zero past the end
    /// (pages are zero-padded on load).
    pub fn word(&self, offset: usize) -> i32 {
        self.words.get(offset).copied().unwrap_or(0)
    }
}

pub trait ProgramLoader {
    fn open(&self, name: &str) -> Result<ProgramImage, LoaderError>;
}

/// Name-indexed image registry.
#[derive(Default)]
pub struct ImageSet {
    images: HashMap<String, ProgramImage>,
}

impl ImageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, image: ProgramImage) {
        self.images.insert(name.to_string(), image);
    }
}

impl ProgramLoader for ImageSet {
    fn open(&self, name: &str) -> Result<ProgramImage, LoaderError> {
        self.images
            .get(name)
            .cloned()
            .ok_or_else(|| LoaderError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_pads_with_zeros() {
        let img = ProgramImage::new(0, vec![5, 6]);
        assert_eq!(img.word(1), 6);
        assert_eq!(img.word(2), 0);
    }

    #[test]
    fn open_unknown_name_fails() {
        let set = ImageSet::new();
        assert!(matches!(set.open("nope.maq"), Err(LoaderError::NotFound(_))));
    }
}
