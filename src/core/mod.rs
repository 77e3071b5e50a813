// 核心基础设施：配置、i18n、接口结构、停机信号与全局状态。
pub mod config;
pub mod i18n;
pub mod schemas;
pub mod shutdown;
pub mod state;
