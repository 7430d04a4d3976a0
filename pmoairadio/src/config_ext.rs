//! Extension pour intégrer la radio dans pmoconfig
//!
//! Ce module fournit le trait `AiRadioConfigExt` qui ajoute à
//! `pmoconfig::Config` la résolution des répertoires utilisés par la radio.
//!
//! # Exemple
//!
//! ```rust,ignore
//! use pmoconfig::get_config;
//! use pmoairadio::AiRadioConfigExt;
//!
//! let config = get_config();
//! let music = config.get_radio_music_dir()?;
//! let segments = config.get_radio_segments_dir()?;
//! ```

use anyhow::Result;
use pmoconfig::Config;
use std::path::PathBuf;

/// Répertoire de musique par défaut (relatif au config_dir)
const DEFAULT_MUSIC_DIR: &str = "music";

/// Répertoire servi contenant l'index HLS et les segments
const DEFAULT_SEGMENTS_DIR: &str = "static";

/// Répertoire privé des intros (staging, handoff)
const DEFAULT_WORK_DIR: &str = "work";

/// Trait d'extension pour la configuration de la radio
///
/// Les chemins peuvent être absolus ou relatifs au répertoire de
/// configuration ; ils sont créés s'ils n'existent pas.
pub trait AiRadioConfigExt {
    /// Répertoire scanné pour construire la playlist
    fn get_radio_music_dir(&self) -> Result<PathBuf>;

    fn set_radio_music_dir(&self, directory: &str) -> Result<()>;

    /// Répertoire servi sous `/static` (index `stream.m3u8` et segments)
    fn get_radio_segments_dir(&self) -> Result<PathBuf>;

    fn set_radio_segments_dir(&self, directory: &str) -> Result<()>;

    /// Répertoire de travail des intros, jamais servi
    fn get_radio_work_dir(&self) -> Result<PathBuf>;

    fn set_radio_work_dir(&self, directory: &str) -> Result<()>;
}

impl AiRadioConfigExt for Config {
    fn get_radio_music_dir(&self) -> Result<PathBuf> {
        self.get_managed_dir(&["radio", "music_dir"], DEFAULT_MUSIC_DIR)
    }

    fn set_radio_music_dir(&self, directory: &str) -> Result<()> {
        self.set_managed_dir(&["radio", "music_dir"], directory)
    }

    fn get_radio_segments_dir(&self) -> Result<PathBuf> {
        self.get_managed_dir(&["radio", "segments_dir"], DEFAULT_SEGMENTS_DIR)
    }

    fn set_radio_segments_dir(&self, directory: &str) -> Result<()> {
        self.set_managed_dir(&["radio", "segments_dir"], directory)
    }

    fn get_radio_work_dir(&self) -> Result<PathBuf> {
        self.get_managed_dir(&["radio", "work_dir"], DEFAULT_WORK_DIR)
    }

    fn set_radio_work_dir(&self, directory: &str) -> Result<()> {
        self.set_managed_dir(&["radio", "work_dir"], directory)
    }
}
