//! 输入校验的小工具

/// 宽松的邮箱形状校验：`local@domain.tld`，不含空白
pub(crate) fn is_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

pub(crate) fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}
