//! The SD card as a `daq::storage::Volume`, on top of embedded-sdmmc.

use daq::storage::Volume;
use embedded_sdmmc::{
    BlockDevice, Error as FsError, Mode, SdCard, TimeSource, Timestamp, VolumeIdx, VolumeManager,
};
use embedded_hal::{
    blocking::{
        delay::DelayUs,
        spi::{Transfer, Write},
    },
    digital::v2::OutputPin,
};

/// The board has no RTC, so every file is stamped with the FAT epoch.
pub struct NoClock;

impl TimeSource for NoClock {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 10,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

#[derive(Debug)]
pub enum Error<E: core::fmt::Debug> {
    NotMounted,
    Fs(FsError<E>),
}

impl<E: core::fmt::Debug> From<FsError<E>> for Error<E> {
    fn from(e: FsError<E>) -> Self {
        Self::Fs(e)
    }
}

/// The first partition of the card, mounted or not.
pub struct SdVolume<D>
where
    D: BlockDevice,
    D::Error: core::fmt::Debug,
{
    manager: VolumeManager<D, NoClock>,
    volume: Option<embedded_sdmmc::Volume>,
}

impl<SPI, CS, DELAY> SdVolume<SdCard<SPI, CS, DELAY>>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    <SPI as Transfer<u8>>::Error: core::fmt::Debug,
    <SPI as Write<u8>>::Error: core::fmt::Debug,
    DELAY: DelayUs<u8>,
{
    /// Tries to mount straight away. A card that isn't there yet is left for
    /// the log's remount to pick up.
    pub fn new(card: SdCard<SPI, CS, DELAY>) -> Self {
        let mut this = Self {
            manager: VolumeManager::new(card, NoClock),
            volume: None,
        };
        if this.mount().is_err() {
            defmt::warn!("no SD card at boot");
        }
        this
    }

    fn mount(&mut self) -> Result<(), Error<embedded_sdmmc::SdCardError>> {
        self.volume = None;
        // Make the card go through its SPI-mode handshake again.
        self.manager.device().mark_card_uninit();
        let volume = self.manager.get_volume(VolumeIdx(0))?;
        self.volume = Some(volume);
        defmt::info!("SD card mounted");
        Ok(())
    }
}

impl<SPI, CS, DELAY> Volume for SdVolume<SdCard<SPI, CS, DELAY>>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    <SPI as Transfer<u8>>::Error: core::fmt::Debug,
    <SPI as Write<u8>>::Error: core::fmt::Debug,
    DELAY: DelayUs<u8>,
{
    type Error = Error<embedded_sdmmc::SdCardError>;

    fn probe(&mut self) -> Result<(), Self::Error> {
        let volume = self.volume.as_ref().ok_or(Error::NotMounted)?;
        let root = self.manager.open_root_dir(volume)?;
        let listed = self.manager.iterate_dir(volume, &root, |_| {});
        self.manager.close_dir(volume, root);
        Ok(listed?)
    }

    fn remount(&mut self) -> Result<(), Self::Error> {
        self.mount()
    }

    fn exists(&mut self, name: &str) -> Result<bool, Self::Error> {
        let volume = self.volume.as_ref().ok_or(Error::NotMounted)?;
        let root = self.manager.open_root_dir(volume)?;
        let found = self.manager.find_directory_entry(volume, &root, name);
        self.manager.close_dir(volume, root);
        match found {
            Ok(_) => Ok(true),
            Err(FsError::FileNotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn append(&mut self, name: &str, data: &[u8]) -> Result<(), Self::Error> {
        let volume = self.volume.as_mut().ok_or(Error::NotMounted)?;
        let root = self.manager.open_root_dir(volume)?;
        let opened = self
            .manager
            .open_file_in_dir(volume, &root, name, Mode::ReadWriteCreateOrAppend);
        self.manager.close_dir(volume, root);
        let mut file = opened?;

        // Close even if the write failed so the directory entry gets updated.
        let written = self.manager.write(volume, &mut file, data);
        let closed = self.manager.close_file(volume, file);
        written?;
        Ok(closed?)
    }

    fn unmount(&mut self) -> Result<(), Self::Error> {
        // Files are closed after every append, so there's nothing to flush.
        self.volume = None;
        defmt::info!("SD card unmounted");
        Ok(())
    }
}
