pub fn md5(input: &[u8]) -> String {
    format!("{:x}", md5::compute(input))
}
