//! 服务属性

use crate::errors::ConfigError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// 服务属性集合
///
/// 键有序，便于日志输出和比较。
pub type Properties = BTreeMap<String, serde_json::Value>;

/// 服务 ID 属性键
pub const SERVICE_ID: &str = "service.id";
/// 服务排名属性键
pub const SERVICE_RANKING: &str = "service.ranking";
/// 配置 PID 属性键
pub const SERVICE_PID: &str = "service.pid";
/// 工厂配置 PID 属性键
pub const FACTORY_PID: &str = "service.factoryPid";
/// 服务接口属性键
pub const OBJECT_CLASS: &str = "objectClass";
/// 切面标记属性键，值为被装饰服务的 ID
pub const ASPECT_MARKER: &str = "dm.aspect";

/// 私有属性键以 `.` 开头，永远不会被传播
pub fn is_private_key(key: &str) -> bool {
    key.starts_with('.')
}

/// 过滤掉私有属性
pub fn public_properties(props: &Properties) -> Properties {
    props
        .iter()
        .filter(|(k, _)| !is_private_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// 可以从一个已注册服务复制到另一个服务上的属性
///
/// 去掉私有键以及注册表管理的 `service.id`、`objectClass`、`dm.aspect`。
pub fn transferable_properties(props: &Properties) -> Properties {
    props
        .iter()
        .filter(|(k, _)| {
            !is_private_key(k)
                && k.as_str() != SERVICE_ID
                && k.as_str() != OBJECT_CLASS
                && k.as_str() != ASPECT_MARKER
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// 将 `overlay` 覆盖到 `base` 上，同名键以 `overlay` 为准
pub fn overlay(base: &mut Properties, overlay: &Properties) {
    for (k, v) in overlay {
        base.insert(k.clone(), v.clone());
    }
}

/// 读取服务排名，缺省为 0
pub fn ranking(props: &Properties) -> i64 {
    props
        .get(SERVICE_RANKING)
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0)
}

/// 从键值对构造属性集合
pub fn properties<I, K, V>(entries: I) -> Properties
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<serde_json::Value>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// 把属性绑定到具体类型
pub fn bind<T>(props: &Properties) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
{
    let value = serde_json::Value::Object(
        props
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );

    serde_json::from_value(value).map_err(|e| ConfigError::SerializationError { source: e })
}

/// 把可序列化的结构转换为属性集合
pub fn to_properties<T>(value: &T) -> Result<Properties, ConfigError>
where
    T: Serialize,
{
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(ConfigError::InvalidProperties {
            message: format!("期望对象类型，实际为: {}", other),
        }),
    }
}
