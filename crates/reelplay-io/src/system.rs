// crates/reelplay-io/src/system.rs
//
// The plugin registry. One System per context owns the ordered plugin list,
// the shared decoded-data cache, and the log handle that every reader and
// writer is constructed with. Lookup tries the longest matching extension,
// then falls back to protocol matching for network sources.

use std::sync::{Arc, Mutex};

use reelplay_core::error::{Error, Result};
use reelplay_core::log::LogSystem;
use reelplay_core::path::{MemoryRead, Path};
use reelplay_core::Context;

use crate::cache::Cache;
use crate::plugin::{FileType, Plugin, Read, Write};
use crate::png_plugin::PngPlugin;
use crate::ppm::PpmPlugin;
use crate::{Info, Options};

pub struct System {
    plugins: Mutex<Vec<Arc<dyn Plugin>>>,
    cache: Arc<Cache>,
    log: Arc<LogSystem>,
}

impl System {
    /// Build the registry with the built-in plugins.
    pub fn new(context: &Arc<Context>) -> Arc<Self> {
        let cache = Cache::new();
        let log = Arc::clone(context.log());
        #[allow(unused_mut)]
        let mut plugins: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(PpmPlugin::new(Arc::clone(&cache), Arc::clone(&log))),
            Arc::new(PngPlugin::new(Arc::clone(&cache), Arc::clone(&log))),
        ];
        #[cfg(feature = "ffmpeg")]
        plugins.push(Arc::new(crate::ffmpeg::FFmpegPlugin::new(
            Arc::clone(&cache),
            Arc::clone(&log),
        )));
        Arc::new(Self { plugins: Mutex::new(plugins), cache, log })
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn log(&self) -> &Arc<LogSystem> {
        &self.log
    }

    pub fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.lock().unwrap().clone()
    }

    /// Register a plugin; later additions win ties against built-ins since
    /// lookup scans in registration order only after extension length.
    pub fn add_plugin(&self, plugin: Arc<dyn Plugin>) {
        self.plugins.lock().unwrap().push(plugin);
    }

    /// Every extension of the given kinds across all plugins.
    pub fn extensions(&self, types: &[FileType]) -> Vec<String> {
        let mut out = Vec::new();
        for plugin in self.plugins.lock().unwrap().iter() {
            out.extend(plugin.extensions_of(types));
        }
        out.sort();
        out.dedup();
        out
    }

    /// The plugin claiming this path: the longest matching extension wins;
    /// protocol matching is the fallback for extension-less URLs.
    pub fn plugin_for_path(&self, path: &Path) -> Option<Arc<dyn Plugin>> {
        let file_name = path.file_name(false).to_lowercase();
        let mut best: Option<(usize, Arc<dyn Plugin>)> = None;
        let plugins = self.plugins.lock().unwrap();
        for plugin in plugins.iter() {
            for ext in plugin.extensions().keys() {
                if file_name.ends_with(ext.as_str()) {
                    let better = best
                        .as_ref()
                        .map(|(len, _)| ext.len() > *len)
                        .unwrap_or(true);
                    if better {
                        best = Some((ext.len(), Arc::clone(plugin)));
                    }
                }
            }
        }
        if best.is_none() && !path.protocol().is_empty() {
            for plugin in plugins.iter() {
                if plugin.matches_protocol(path.protocol()) {
                    return Some(Arc::clone(plugin));
                }
            }
        }
        best.map(|(_, plugin)| plugin)
    }

    /// Open a reader for a path, optionally backed by in-memory buffers.
    pub fn read(&self, path: &Path, memory: &[MemoryRead], options: &Options)
        -> Result<Arc<dyn Read>> {
        let plugin = self
            .plugin_for_path(path)
            .ok_or_else(|| Error::NotFound(format!("no plugin for {}", path.get())))?;
        plugin.read(path, memory, options)
    }

    /// Open a writer; fails when no plugin can represent the image info.
    pub fn write(&self, path: &Path, info: &Info, options: &Options) -> Result<Box<dyn Write>> {
        let plugin = self
            .plugin_for_path(path)
            .ok_or_else(|| Error::NotFound(format!("no plugin for {}", path.get())))?;
        plugin.write(path, info, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::ExtensionMap;
    use reelplay_core::image::ImageInfo;

    struct StreamPlugin {
        extensions: ExtensionMap,
    }

    impl Plugin for StreamPlugin {
        fn name(&self) -> &str {
            "Stream"
        }
        fn extensions(&self) -> &ExtensionMap {
            &self.extensions
        }
        fn matches_protocol(&self, protocol: &str) -> bool {
            protocol.eq_ignore_ascii_case("ndi://")
        }
        fn read(&self, _path: &Path, _memory: &[MemoryRead], _options: &Options)
            -> Result<Arc<dyn Read>> {
            Err(Error::NotFound("stream offline".into()))
        }
        fn write_info(&self, _info: &ImageInfo, _options: &Options) -> Result<ImageInfo> {
            Err(Error::Format("read-only".into()))
        }
        fn write(&self, _path: &Path, _info: &Info, _options: &Options)
            -> Result<Box<dyn Write>> {
            Err(Error::Format("read-only".into()))
        }
    }

    #[test]
    fn lookup_by_extension() {
        let context = Context::new();
        let system = System::new(&context);
        let path = Path::parse("/media/frame.0001.ppm").unwrap();
        assert_eq!(system.plugin_for_path(&path).unwrap().name(), "PPM");
        let path = Path::parse("/media/still.PNG").unwrap();
        assert_eq!(system.plugin_for_path(&path).unwrap().name(), "PNG");
        let path = Path::parse("/media/notes.txt").unwrap();
        assert!(system.plugin_for_path(&path).is_none());
    }

    #[test]
    fn protocol_fallback() {
        let context = Context::new();
        let system = System::new(&context);
        system.add_plugin(Arc::new(StreamPlugin { extensions: ExtensionMap::new() }));
        let path = Path::parse("ndi://studio/camera1").unwrap();
        assert_eq!(system.plugin_for_path(&path).unwrap().name(), "Stream");
    }

    #[test]
    fn longest_extension_wins() {
        struct ArchivePlugin {
            extensions: ExtensionMap,
        }
        impl Plugin for ArchivePlugin {
            fn name(&self) -> &str {
                "Archive"
            }
            fn extensions(&self) -> &ExtensionMap {
                &self.extensions
            }
            fn read(&self, _p: &Path, _m: &[MemoryRead], _o: &Options)
                -> Result<Arc<dyn Read>> {
                Err(Error::NotFound("unimplemented".into()))
            }
            fn write_info(&self, _i: &ImageInfo, _o: &Options) -> Result<ImageInfo> {
                Err(Error::Format("read-only".into()))
            }
            fn write(&self, _p: &Path, _i: &Info, _o: &Options) -> Result<Box<dyn Write>> {
                Err(Error::Format("read-only".into()))
            }
        }
        let context = Context::new();
        let system = System::new(&context);
        let mut extensions = ExtensionMap::new();
        extensions.insert(".backup.ppm".into(), FileType::Sequence);
        system.add_plugin(Arc::new(ArchivePlugin { extensions }));
        let path = Path::parse("/media/frame.backup.ppm").unwrap();
        assert_eq!(system.plugin_for_path(&path).unwrap().name(), "Archive");
        let path = Path::parse("/media/frame.0001.ppm").unwrap();
        assert_eq!(system.plugin_for_path(&path).unwrap().name(), "PPM");
    }

    #[test]
    fn read_unknown_extension_is_not_found() {
        let context = Context::new();
        let system = System::new(&context);
        let path = Path::parse("mystery.xyz").unwrap();
        let result = system.read(&path, &[], &Options::new());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn extension_listing() {
        let context = Context::new();
        let system = System::new(&context);
        let sequences = system.extensions(&[FileType::Sequence]);
        assert!(sequences.contains(&".ppm".to_string()));
        assert!(sequences.contains(&".png".to_string()));
        assert!(system.extensions(&[FileType::Movie]).is_empty() || cfg!(feature = "ffmpeg"));
    }
}
