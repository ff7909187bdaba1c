mod descriptor_area;
mod marshal;

pub use self::{
    descriptor_area::{NativeDescriptorArea, IND_NOT_NULL, IND_NULL},
    marshal::{read_row_values, write_values},
};
