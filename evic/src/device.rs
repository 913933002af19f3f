use crate::command::Opcode;
use core::fmt;

/// Nuvoton's vendor id, used by the Evic bootloader.
pub const NUVOTON_VID: u16 = 0x0416;

/// Product id of the Evic HID bootloader.
pub const EVIC_PID: u16 = 0x5020;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryRegion {
    Aprom,
    DataFlash,
}

impl MemoryRegion {
    pub fn read_opcode(self) -> Opcode {
        match self {
            MemoryRegion::Aprom => Opcode::ReadAprom,
            MemoryRegion::DataFlash => Opcode::ReadDataFlash,
        }
    }

    pub fn write_opcode(self) -> Opcode {
        match self {
            MemoryRegion::Aprom => Opcode::WriteAprom,
            MemoryRegion::DataFlash => Opcode::WriteDataFlash,
        }
    }

    pub fn erase_opcode(self) -> Opcode {
        match self {
            MemoryRegion::Aprom => Opcode::EraseAprom,
            MemoryRegion::DataFlash => Opcode::EraseDataFlash,
        }
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryRegion::Aprom => f.write_str("APROM"),
            MemoryRegion::DataFlash => f.write_str("data flash"),
        }
    }
}

/// Where a region lives and how it is transferred.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegionLayout {
    pub base: u32,
    pub max_size: usize,
    /// Payload bytes per read or write command.
    pub chunk_size: usize,
}

impl RegionLayout {
    /// Device address of `offset` within the region.
    pub fn address(&self, offset: usize) -> u32 {
        self.base + offset as u32
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceModel {
    /// Four character product id reported by the device, e.g. `E052`.
    pub product_id: &'static str,
    pub name: &'static str,
    /// Product ids of firmware images this board accepts.
    pub firmware_ids: &'static [&'static str],
    pub aprom: RegionLayout,
    pub data_flash: RegionLayout,
}

impl DeviceModel {
    pub fn layout(&self, region: MemoryRegion) -> &RegionLayout {
        match region {
            MemoryRegion::Aprom => &self.aprom,
            MemoryRegion::DataFlash => &self.data_flash,
        }
    }
}

// All supported boards use the same Nuvoton part.
const APROM: RegionLayout = RegionLayout {
    base: 0x0000_0000,
    max_size: 0x1_E000,
    chunk_size: 1024,
};

const DATA_FLASH: RegionLayout = RegionLayout {
    base: 0x0001_F000,
    max_size: 2048,
    chunk_size: 256,
};

pub const MODELS: &[DeviceModel] = &[
    DeviceModel {
        product_id: "E052",
        name: "eVic-VTC Mini",
        firmware_ids: &["E052"],
        aprom: APROM,
        data_flash: DATA_FLASH,
    },
    DeviceModel {
        product_id: "E060",
        name: "Cuboid",
        firmware_ids: &["E060"],
        aprom: APROM,
        data_flash: DATA_FLASH,
    },
    DeviceModel {
        product_id: "E056",
        name: "Cuboid Mini",
        firmware_ids: &["E056"],
        aprom: APROM,
        data_flash: DATA_FLASH,
    },
    DeviceModel {
        product_id: "W007",
        name: "Presa TC75W",
        firmware_ids: &["W007"],
        aprom: APROM,
        data_flash: DATA_FLASH,
    },
    DeviceModel {
        product_id: "M011",
        name: "iStick TC100W",
        firmware_ids: &["M011"],
        aprom: APROM,
        data_flash: DATA_FLASH,
    },
    DeviceModel {
        product_id: "M041",
        name: "iStick Pico",
        firmware_ids: &["M041"],
        aprom: APROM,
        data_flash: DATA_FLASH,
    },
];

pub fn lookup<'a>(models: &'a [DeviceModel], product_id: &str) -> Option<&'a DeviceModel> {
    models.iter().find(|model| model.product_id == product_id)
}

/// USB vendor ids mapped to the product ids of their HID bootloaders.
pub fn vendor_map() -> std::collections::HashMap<u16, Vec<u16>> {
    maplit::hashmap! {
        NUVOTON_VID => vec![EVIC_PID],
    }
}
