/// A slice of a buffer transferred by one command.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Chunk<'a> {
    pub offset: usize,
    pub data: &'a [u8],
}

/// Splits `buffer` into chunks of `chunk_size` bytes in ascending offset order.
/// The last chunk is shorter when the length is not a multiple of `chunk_size`.
pub fn chunks(buffer: &[u8], chunk_size: usize) -> impl Iterator<Item = Chunk<'_>> {
    buffer
        .chunks(chunk_size.max(1))
        .enumerate()
        .map(move |(index, data)| Chunk {
            offset: index * chunk_size.max(1),
            data,
        })
}

/// `(offset, len)` pairs covering `0..size`, for reads where there is no buffer yet.
pub fn spans(size: usize, chunk_size: usize) -> impl Iterator<Item = (usize, usize)> {
    let chunk_size = chunk_size.max(1);
    (0..size)
        .step_by(chunk_size)
        .map(move |offset| (offset, chunk_size.min(size - offset)))
}
