// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult, VkContext};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// SPIR-V code read from disk as 4-byte words. A length that is not a multiple
/// of four is zero-padded up to the next word.
#[derive(Clone, Debug)]
pub struct ShaderBinary {
    pub path: PathBuf,
    pub byte_len: usize,
    pub words: Vec<u32>,
}

impl ShaderBinary {
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| EngineError::ShaderMissing {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(path, &bytes)
    }

    pub fn from_bytes(path: impl Into<PathBuf>, bytes: &[u8]) -> EngineResult<Self> {
        let path = path.into();
        if bytes.is_empty() {
            return Err(EngineError::ShaderEmpty { path });
        }

        let mut words = vec![0u32; bytes.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..bytes.len()].copy_from_slice(bytes);

        if words[0] != SPIRV_MAGIC {
            warn!("{} does not start with the SPIR-V magic number", path.display());
        }
        debug!("loaded shader {} ({} bytes)", path.display(), bytes.len());
        Ok(Self {
            path,
            byte_len: bytes.len(),
            words,
        })
    }

    /// Size in bytes as handed to Vulkan (padded to whole words).
    pub fn code_size(&self) -> usize {
        self.words.len() * 4
    }

    pub unsafe fn create_module(&self, device: &ash::Device) -> EngineResult<vk::ShaderModule> {
        let ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: self.code_size(),
            p_code: self.words.as_ptr(),
            ..Default::default()
        };
        device
            .create_shader_module(&ci, None)
            .vk_op("vkCreateShaderModule")
    }
}

/// Vertex and fragment stage binaries, loaded once at startup.
#[derive(Clone, Debug)]
pub struct ShaderPair {
    pub vertex: ShaderBinary,
    pub fragment: ShaderBinary,
}

impl ShaderPair {
    pub fn load(vertex: impl AsRef<Path>, fragment: impl AsRef<Path>) -> EngineResult<Self> {
        Ok(Self {
            vertex: ShaderBinary::load(vertex)?,
            fragment: ShaderBinary::load(fragment)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BUILTIN_FRAGMENT_SHADER, BUILTIN_VERTEX_SHADER};

    #[test]
    fn odd_length_is_padded_to_whole_words() {
        let bin = ShaderBinary::from_bytes("pad.spv", &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(bin.byte_len, 5);
        assert_eq!(bin.words.len(), 2);
        assert_eq!(bin.code_size(), 8);
        let bytes: &[u8] = bytemuck::cast_slice(bin.words.as_slice());
        assert_eq!(bytes, &[1, 2, 3, 4, 5, 0, 0, 0]);
    }

    #[test]
    fn word_aligned_length_is_kept() {
        let bin = ShaderBinary::from_bytes("ok.spv", &SPIRV_MAGIC.to_ne_bytes()).unwrap();
        assert_eq!(bin.words, vec![SPIRV_MAGIC]);
        assert_eq!(bin.code_size(), 4);
    }

    #[test]
    fn empty_binary_is_fatal() {
        let err = ShaderBinary::from_bytes("empty.spv", &[]).unwrap_err();
        assert!(matches!(err, EngineError::ShaderEmpty { .. }));
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = ShaderBinary::load("does/not/exist.spv").unwrap_err();
        match err {
            EngineError::ShaderMissing { path, source } => {
                assert_eq!(path, PathBuf::from("does/not/exist.spv"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn builtin_shaders_are_spirv() {
        let pair = ShaderPair::load(BUILTIN_VERTEX_SHADER, BUILTIN_FRAGMENT_SHADER).unwrap();
        assert_eq!(pair.vertex.words[0], SPIRV_MAGIC);
        assert_eq!(pair.fragment.words[0], SPIRV_MAGIC);
        assert_eq!(pair.vertex.byte_len % 4, 0);
    }
}
